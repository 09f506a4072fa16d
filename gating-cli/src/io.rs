//! Reading and writing job/output files (.json and .json.gz).

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use gating_core::PipelineJob;

fn is_gz(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

/// Load any JSON value, gunzipping `.gz` files.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let value = if is_gz(path) {
        serde_json::from_reader(GzDecoder::new(reader))
    } else {
        serde_json::from_reader(reader)
    };
    value.with_context(|| format!("parsing {}", path.display()))
}

/// Load one or more jobs: a file holds either a single job object or an
/// array of them.
pub fn load_jobs(path: impl AsRef<Path>) -> Result<Vec<PipelineJob>> {
    let path = path.as_ref();
    let json: Value = load_json(path)?;
    match json {
        Value::Array(_) => Ok(serde_json::from_value(json)?),
        Value::Object(ref map) if map.contains_key("events") => Ok(vec![serde_json::from_value(json)?]),
        _ => bail!("{}: expected a job object or an array of jobs", path.display()),
    }
}

fn write_to<W: Write, T: Serialize>(writer: W, value: &T, pretty: bool) -> serde_json::Result<()> {
    if pretty {
        serde_json::to_writer_pretty(writer, value)
    } else {
        serde_json::to_writer(writer, value)
    }
}

/// Write `value` as JSON, gzipped if `path` ends in `.gz`.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    if is_gz(path) {
        let mut encoder = GzEncoder::new(&mut writer, Compression::default());
        write_to(&mut encoder, value, pretty)?;
        encoder.finish()?;
    } else {
        write_to(&mut writer, value, pretty)?;
    }
    writer.flush().with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::synth::{synthesize, SynthConfig};

    #[test]
    fn jobs_round_trip_through_gz() {
        let dir = std::env::temp_dir().join(format!("gating-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let job = synthesize(&SynthConfig { clusters: 2, events_per_cluster: 100, ..SynthConfig::default() });

        let single = dir.join("job.json.gz");
        write_json(&single, &job, false).unwrap();
        let loaded = load_jobs(&single).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key(), job.key());
        assert_eq!(loaded[0].events.len(), job.events.len());

        let many = dir.join("jobs.json");
        write_json(&many, &vec![job.clone(), job.clone()], true).unwrap();
        assert_eq!(load_jobs(&many).unwrap().len(), 2);

        let bogus = dir.join("bogus.json");
        write_json(&bogus, &serde_json::json!({"foo": 1}), false).unwrap();
        assert!(load_jobs(&bogus).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}

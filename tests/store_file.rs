mod common;
use crate::common::builders::JobBuilder;

use std::error::Error;

use jobdag::model::{Argument, OutputLine, Variables};
use jobdag::store::{FileJobStore, JobStore};
use jobdag::types::JobStatus;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn state_survives_reopening() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state").join("jobs.json");

    {
        let store = FileJobStore::open(&path, 3)?;
        let job = JobBuilder::new("ping")
            .executable("ping")
            .arg(Argument::named("-c", "3"))
            .status(JobStatus::Success)
            .return_code(0)
            .stdout("64 bytes from 10.0.0.1")
            .build();
        store.save_job(&job)?;
        assert!(store.append_output("ping", OutputLine::stderr("late"))?);

        for value in ["1", "2", "3", "4", "2"] {
            store.record_argument_history("ping", "-c", value)?;
        }
        store.record_working_directory("/tmp")?;
        store.save_variables(&[("host", "10.0.0.1")].into_iter().collect::<Variables>())?;
    }

    let store = FileJobStore::open(&path, 3)?;
    let job = store.load_job("ping")?.ok_or("job missing after reopen")?;
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.return_code, Some(0));
    assert_eq!(
        job.output,
        vec![
            OutputLine::stdout("64 bytes from 10.0.0.1"),
            OutputLine::stderr("late"),
        ]
    );
    assert_eq!(store.list_argument_history("ping", "-c")?, vec!["2", "4", "3"]);
    assert_eq!(store.list_recent_working_directories()?, vec!["/tmp"]);
    assert_eq!(store.load_variables()?.get("host"), Some("10.0.0.1"));
    Ok(())
}

#[test]
fn delete_is_persisted_with_its_history() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.json");

    {
        let store = FileJobStore::open(&path, 10)?;
        store.save_job(&JobBuilder::new("a").build())?;
        store.record_argument_history("a", "--x", "1")?;
        assert!(store.delete_job("a")?);
        assert!(!store.delete_job("a")?);
    }

    let store = FileJobStore::open(&path, 10)?;
    assert!(store.load_job("a")?.is_none());
    assert!(store.list_argument_history("a", "--x")?.is_empty());
    Ok(())
}

#[test]
fn empty_state_file_opens_as_empty_store() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.json");
    std::fs::write(&path, "")?;

    let store = FileJobStore::open(&path, 10)?;
    assert!(store.list_jobs()?.is_empty());
    Ok(())
}

#[test]
fn output_for_unknown_job_is_not_stored() -> TestResult {
    let dir = tempfile::tempdir()?;
    let store = FileJobStore::open(dir.path().join("state.json"), 10)?;
    assert!(!store.append_output("ghost", OutputLine::stdout("x"))?);
    Ok(())
}

#[test]
fn streamed_output_is_batched_and_flushed() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("jobs.json");

    {
        let store = FileJobStore::open(&path, 3)?;
        store.save_job(&JobBuilder::new("chatty").build())?;
        for i in 0..500 {
            assert!(store.append_output("chatty", OutputLine::stdout(format!("line {i}")))?);
        }
        // Lines arrived right after the save, so they are still in memory.
        let on_disk = std::fs::read_to_string(&path)?;
        assert!(!on_disk.contains("line 499"));
        assert_eq!(store.load_job("chatty")?.ok_or("missing")?.output.len(), 500);

        store.flush()?;
        assert!(std::fs::read_to_string(&path)?.contains("line 499"));

        store.append_output("chatty", OutputLine::stdout("after flush"))?;
    }

    // Dropping the store writes what is still pending.
    let store = FileJobStore::open(&path, 3)?;
    let job = store.load_job("chatty")?.ok_or("missing after reopen")?;
    assert_eq!(job.output.len(), 501);
    assert_eq!(job.output.last(), Some(&OutputLine::stdout("after flush")));
    Ok(())
}

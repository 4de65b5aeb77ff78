use crate::mime::MimeSniffer;
use crate::outputs::{JobOutput, JobOutputResult, MissingOutput};
use crate::request::PersistedJob;
use crate::specs::JobExpectedOutput;
use crate::template::{JobEnvironment, RawTemplateString};
use crate::types::{JobId, JobOutputId};
use bytes::Bytes;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const SNIFF_LEN: usize = 8192;

/// Look for every expected output of `job` in its working directory, in declaration order.
pub(super) fn resolve_outputs(
    job: &PersistedJob,
    working_dir: &Path,
    sniffer: &dyn MimeSniffer,
) -> Vec<JobOutputResult> {
    let env = JobEnvironment::new(job, working_dir);
    job.spec()
        .expected_outputs
        .iter()
        .map(|expected| {
            let id = resolve_or_raw(&job.id, &expected.id, &env);
            let path = resolve_or_raw(&job.id, &expected.path, &env);
            resolve_output(&job.id, working_dir, id, path, expected, sniffer)
        })
        .collect()
}

// an unresolvable template is reported under its raw text so the output shows up as missing
fn resolve_or_raw(job_id: &JobId, template: &RawTemplateString, env: &JobEnvironment) -> String {
    template.evaluate(env).unwrap_or_else(|e| {
        warn!(job_id = %job_id, template = %template, error = %e, "cannot resolve expected output");
        template.as_str().to_string()
    })
}

fn resolve_output(
    job_id: &JobId,
    working_dir: &Path,
    id: String,
    path: String,
    expected: &JobExpectedOutput,
    sniffer: &dyn MimeSniffer,
) -> JobOutputResult {
    let id = JobOutputId::new(id);
    let file = working_dir.join(&path);

    let data = if file.exists() {
        match fs::read(&file) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(job_id = %job_id, output_id = %id, error = %e, "cannot read output");
                None
            }
        }
    } else {
        None
    };

    match data {
        Some(data) => {
            let mime_type = match &expected.mime_type {
                Some(mime_type) => mime_type.clone(),
                None => sniffer.sniff(&data[..data.len().min(SNIFF_LEN)], &path),
            };
            debug!(job_id = %job_id, output_id = %id, %mime_type, size = data.len(), "found output");
            JobOutputResult::Present(JobOutput {
                id,
                data: Bytes::from(data),
                mime_type,
                name: expected.name.clone(),
                description: expected.description.clone(),
                metadata: expected.metadata.clone(),
            })
        }
        None => {
            debug!(job_id = %job_id, output_id = %id, expected_at = %path, "output missing");
            JobOutputResult::Missing(MissingOutput {
                id,
                required: expected.required,
                expected_location: path,
            })
        }
    }
}

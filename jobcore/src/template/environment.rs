use super::{TemplateError, Value};
use crate::request::{FileInput, PersistedJob};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The bindings and helper functions visible to a template expression.
///
/// `toJSON`, `join` and `toString` are pure and have default implementations;
/// `toFile` and `toDir` write into the job's working directory.
pub trait ExpressionEnvironment {
    /// The `request` binding.
    fn request(&self) -> Result<serde_json::Value, TemplateError>;

    /// One entry of the `inputs` binding.
    fn input(&self, id: &str) -> Option<Value>;

    fn input_ids(&self) -> Vec<String>;

    /// The `outputDir` binding.
    fn output_dir(&self) -> &Path;

    fn to_file(&self, value: &Value) -> Result<String, TemplateError>;

    fn to_dir(&self, value: &Value) -> Result<String, TemplateError>;

    fn to_json(&self, value: &Value) -> Result<String, TemplateError> {
        Ok(serde_json::to_string(&value.to_json())?)
    }

    fn join(&self, separator: &Value, values: &Value) -> Result<String, TemplateError> {
        let separator = match separator {
            Value::String(s) | Value::Json(serde_json::Value::String(s)) => s,
            other => {
                return Err(TemplateError::TypeMismatch {
                    function: "join".to_string(),
                    expected: "string delimiter",
                    got: other.type_name(),
                })
            }
        };
        match values {
            Value::StringArray(values) => Ok(values.join(separator)),
            other => Err(TemplateError::TypeMismatch {
                function: "join".to_string(),
                expected: "string[]",
                got: other.type_name(),
            }),
        }
    }

    fn stringify(&self, value: &Value) -> Result<String, TemplateError> {
        Ok(value.stringify())
    }
}

/// The environment a job's arguments, dependencies and outputs are resolved in.
pub struct JobEnvironment<'a> {
    job: &'a PersistedJob,
    working_dir: &'a Path,
}

impl<'a> JobEnvironment<'a> {
    pub fn new(job: &'a PersistedJob, working_dir: &'a Path) -> Self {
        Self { job, working_dir }
    }

    /// A not-yet-existing path in the working directory starting with `prefix`.
    fn fresh_path(&self, prefix: &str) -> PathBuf {
        self.working_dir
            .join(format!("{}{}", prefix, uuid::Uuid::new_v4().simple()))
    }

    fn write_new(path: &Path, data: &[u8]) -> Result<(), TemplateError> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(data)?;
        Ok(())
    }
}

fn checked_filename(filename: &str) -> Result<&str, TemplateError> {
    let plain = Path::new(filename)
        .file_name()
        .map_or(false, |name| name == std::ffi::OsStr::new(filename));
    if plain {
        Ok(filename)
    } else {
        Err(TemplateError::InvalidFilename(filename.to_string()))
    }
}

impl<'a> ExpressionEnvironment for JobEnvironment<'a> {
    fn request(&self) -> Result<serde_json::Value, TemplateError> {
        Ok(serde_json::to_value(self.job)?)
    }

    fn input(&self, id: &str) -> Option<Value> {
        self.job.inputs().get(id).map(Value::from)
    }

    fn input_ids(&self) -> Vec<String> {
        self.job.inputs().keys().cloned().collect()
    }

    fn output_dir(&self) -> &Path {
        self.working_dir
    }

    fn to_file(&self, value: &Value) -> Result<String, TemplateError> {
        match value {
            Value::String(content) | Value::Json(serde_json::Value::String(content)) => {
                let path = self.fresh_path("request");
                Self::write_new(&path, content.as_bytes())?;
                Ok(path.display().to_string())
            }
            Value::File(FileInput { filename, data }) => {
                let filename = checked_filename(filename)?;
                let mut path = self.working_dir.join(filename);
                if path.exists() {
                    // keep the name intact by moving the file into its own directory
                    let dir = self.fresh_path(filename);
                    fs::create_dir(&dir)?;
                    path = dir.join(filename);
                }
                Self::write_new(&path, data)?;
                Ok(path.display().to_string())
            }
            other => Err(TemplateError::TypeMismatch {
                function: "toFile".to_string(),
                expected: "string or file (try using toJSON?)",
                got: other.type_name(),
            }),
        }
    }

    fn to_dir(&self, value: &Value) -> Result<String, TemplateError> {
        let files = match value {
            Value::FileArray(files) => files,
            other => {
                return Err(TemplateError::TypeMismatch {
                    function: "toDir".to_string(),
                    expected: "file[] list",
                    got: other.type_name(),
                })
            }
        };

        let dir = self.fresh_path("toDir");
        fs::create_dir(&dir)?;

        // duplicate names are numbered in submission order: A, A -> 1_A, 2_A
        let mut totals: HashMap<&str, usize> = HashMap::new();
        for file in files {
            *totals.entry(checked_filename(&file.filename)?).or_default() += 1;
        }
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for file in files {
            let name = file.filename.as_str();
            let nth = seen.entry(name).or_default();
            *nth += 1;
            let target = if totals[name] == 1 {
                dir.join(name)
            } else {
                dir.join(format!("{}_{}", nth, name))
            };
            Self::write_new(&target, &file.data)?;
        }
        Ok(dir.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JobInput, ValidJobRequest};
    use crate::specs::{ExecutionConfiguration, JobSpec};
    use crate::template::RawTemplateString;
    use crate::types::JobId;
    use tempfile::TempDir;

    fn job() -> PersistedJob {
        let spec = JobSpec::new(ExecutionConfiguration::new("echo", Vec::<String>::new()));
        let request = ValidJobRequest::new("alice", "test job", spec)
            .with_input("msg", JobInput::String("hello".into()))
            .with_input(
                "names",
                JobInput::StringArray(vec!["a".into(), "b".into(), "c".into()]),
            )
            .with_input("count", JobInput::Json(serde_json::json!(3)))
            .with_input(
                "files",
                JobInput::FileArray(vec![
                    FileInput::new("A", "first"),
                    FileInput::new("B", "only"),
                    FileInput::new("A", "second"),
                ]),
            );
        PersistedJob::new(JobId::new("job-1"), request)
    }

    fn eval(template: &str, job: &PersistedJob, dir: &Path) -> Result<String, TemplateError> {
        RawTemplateString::new(template).evaluate(&JobEnvironment::new(job, dir))
    }

    #[test]
    fn resolves_bindings() {
        let dir = TempDir::new().unwrap();
        let job = job();
        assert_eq!(eval("${inputs.msg}", &job, dir.path()).unwrap(), "hello");
        assert_eq!(eval("n=${inputs.count}", &job, dir.path()).unwrap(), "n=3");
        assert_eq!(eval("${request.id}", &job, dir.path()).unwrap(), "job-1");
        assert_eq!(eval("${request.owner}", &job, dir.path()).unwrap(), "alice");
        assert_eq!(
            eval("${outputDir}/out", &job, dir.path()).unwrap(),
            format!("{}/out", dir.path().display())
        );
    }

    #[test]
    fn join_and_to_json() {
        let dir = TempDir::new().unwrap();
        let job = job();
        assert_eq!(
            eval("${join(\",\", inputs.names)}", &job, dir.path()).unwrap(),
            "a,b,c"
        );
        assert_eq!(
            eval("${toJSON(inputs.names)}", &job, dir.path()).unwrap(),
            r#"["a","b","c"]"#
        );
        assert_eq!(eval("${toString(inputs.count)}", &job, dir.path()).unwrap(), "3");
    }

    #[test]
    fn list_inputs_cannot_be_spliced_directly() {
        let dir = TempDir::new().unwrap();
        let job = job();
        assert!(matches!(
            eval("${inputs.names}", &job, dir.path()),
            Err(TemplateError::Unrenderable("string[]"))
        ));
    }

    #[test]
    fn to_file_writes_into_working_dir() {
        let dir = TempDir::new().unwrap();
        let job = job();
        let path = eval("${toFile(toJSON(inputs.msg))}", &job, dir.path()).unwrap();
        let path = PathBuf::from(path);
        assert!(path.starts_with(dir.path()));
        assert_eq!(fs::read_to_string(path).unwrap(), "\"hello\"");
    }

    #[test]
    fn to_dir_prefixes_duplicate_names() {
        let dir = TempDir::new().unwrap();
        let job = job();
        let out = PathBuf::from(eval("${toDir(inputs.files)}", &job, dir.path()).unwrap());
        assert_eq!(fs::read_to_string(out.join("1_A")).unwrap(), "first");
        assert_eq!(fs::read_to_string(out.join("2_A")).unwrap(), "second");
        assert_eq!(fs::read_to_string(out.join("B")).unwrap(), "only");
    }

    #[test]
    fn reports_bad_calls() {
        let dir = TempDir::new().unwrap();
        let job = job();
        assert!(matches!(
            eval("${toJSON()}", &job, dir.path()),
            Err(TemplateError::Arity { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            eval("${toDir(inputs.msg)}", &job, dir.path()),
            Err(TemplateError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval("${nope(inputs.msg)}", &job, dir.path()),
            Err(TemplateError::UnknownFunction(_))
        ));
        assert!(matches!(
            eval("${inputs.missing}", &job, dir.path()),
            Err(TemplateError::NoSuchMember(_))
        ));
        assert!(matches!(
            eval("${env.HOME}", &job, dir.path()),
            Err(TemplateError::UnknownBinding(_))
        ));
    }
}

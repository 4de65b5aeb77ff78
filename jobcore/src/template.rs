//! Templated strings used in job specs, e.g. `--input=${toFile(toJSON(inputs.config))}`.
//!
//! A template is literal text with `${expr}` segments. An expression is a string
//! literal, a dotted member path rooted at one of the bindings (`request`,
//! `inputs`, `outputDir`), or a call to one of the helper functions (`toJSON`,
//! `toFile`, `toDir`, `join`, `toString`). Bindings and helpers are supplied by an
//! [`ExpressionEnvironment`].

mod environment;
mod parser;

pub use environment::{ExpressionEnvironment, JobEnvironment};

use crate::request::{FileInput, JobInput};
use parser::{Expr, Segment};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{template}: {reason}")]
    Syntax { template: String, reason: String },
    #[error("{0}: unknown binding")]
    UnknownBinding(String),
    #[error("{0}: unknown function")]
    UnknownFunction(String),
    #[error("{function} called with {got} args (expects {expected})")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("{function} called with a {got}, should be called with a {expected}")]
    TypeMismatch {
        function: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{0}: no such member")]
    NoSuchMember(String),
    #[error("a {0} cannot be used directly in a template (try join, toFile or toDir)")]
    Unrenderable(&'static str),
    #[error("{0}: invalid filename")]
    InvalidFilename(String),
    #[error("could not create an input file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A string that may contain `${...}` expressions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTemplateString(String);

impl RawTemplateString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Evaluate every expression against `env` and splice the results into the text.
    pub fn evaluate(&self, env: &dyn ExpressionEnvironment) -> Result<String, TemplateError> {
        let mut resolved = String::with_capacity(self.0.len());
        for segment in parser::parse(&self.0)? {
            match segment {
                Segment::Text(text) => resolved.push_str(&text),
                Segment::Expr(expr) => resolved.push_str(&eval(&expr, env)?.render()?),
            }
        }
        Ok(resolved)
    }
}

impl fmt::Display for RawTemplateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RawTemplateString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A value flowing through an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    StringArray(Vec<String>),
    File(FileInput),
    FileArray(Vec<FileInput>),
    Json(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::StringArray(_) => "string[]",
            Value::File(_) => "file",
            Value::FileArray(_) => "file[]",
            Value::Json(_) => "json",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        fn file_json(file: &FileInput) -> serde_json::Value {
            json!({ "filename": file.filename, "data": file.data })
        }
        match self {
            Value::String(s) => json!(s),
            Value::StringArray(values) => json!(values),
            Value::File(file) => file_json(file),
            Value::FileArray(files) => files.iter().map(file_json).collect(),
            Value::Json(value) => value.clone(),
        }
    }

    /// Loose conversion used by `toString`.
    pub fn stringify(&self) -> String {
        match self {
            Value::String(s) | Value::Json(serde_json::Value::String(s)) => s.clone(),
            Value::File(file) => file.filename.clone(),
            other => other.to_json().to_string(),
        }
    }

    /// Strict conversion used when splicing a value into a template.
    fn render(&self) -> Result<String, TemplateError> {
        match self {
            Value::String(s) | Value::Json(serde_json::Value::String(s)) => Ok(s.clone()),
            Value::Json(value) => Ok(value.to_string()),
            other => Err(TemplateError::Unrenderable(other.type_name())),
        }
    }

    fn member(self, name: &str, path: &str) -> Result<Value, TemplateError> {
        let missing = || TemplateError::NoSuchMember(path.to_string());
        match self {
            Value::Json(serde_json::Value::Object(mut map)) => {
                map.remove(name).map(Value::Json).ok_or_else(missing)
            }
            Value::Json(serde_json::Value::Array(mut values)) => {
                let idx: usize = name.parse().map_err(|_| missing())?;
                if idx < values.len() {
                    Ok(Value::Json(values.swap_remove(idx)))
                } else {
                    Err(missing())
                }
            }
            Value::File(file) if name == "filename" => Ok(Value::String(file.filename)),
            _ => Err(missing()),
        }
    }
}

impl From<&JobInput> for Value {
    fn from(input: &JobInput) -> Self {
        match input {
            JobInput::String(s) => Value::String(s.clone()),
            JobInput::StringArray(values) => Value::StringArray(values.clone()),
            JobInput::File(file) => Value::File(file.clone()),
            JobInput::FileArray(files) => Value::FileArray(files.clone()),
            JobInput::Json(value) => Value::Json(value.clone()),
        }
    }
}

fn eval(expr: &Expr, env: &dyn ExpressionEnvironment) -> Result<Value, TemplateError> {
    match expr {
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Path(path) => resolve_path(path, env),
        Expr::Call { function, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(function, &args, env)
        }
    }
}

fn resolve_path(path: &[String], env: &dyn ExpressionEnvironment) -> Result<Value, TemplateError> {
    let dotted = path.join(".");
    let (root, members) = match path.split_first() {
        Some(split) => split,
        None => return Err(TemplateError::NoSuchMember(dotted)),
    };
    let (value, members) = match (root.as_str(), members) {
        ("request", rest) => (Value::Json(env.request()?), rest),
        ("inputs", []) => {
            let inputs = env
                .input_ids()
                .into_iter()
                .filter_map(|id| env.input(&id).map(|v| (id, v.to_json())))
                .collect();
            (Value::Json(serde_json::Value::Object(inputs)), &[][..])
        }
        ("inputs", [id, rest @ ..]) => {
            let input = env
                .input(id)
                .ok_or_else(|| TemplateError::NoSuchMember(format!("inputs.{}", id)))?;
            (input, rest)
        }
        ("outputDir", rest) => (Value::String(env.output_dir().display().to_string()), rest),
        (other, _) => return Err(TemplateError::UnknownBinding(other.to_string())),
    };
    members
        .iter()
        .try_fold(value, |value, member| value.member(member, &dotted))
}

fn call(
    function: &str,
    args: &[Value],
    env: &dyn ExpressionEnvironment,
) -> Result<Value, TemplateError> {
    let arity = |expected: usize| {
        if args.len() == expected {
            Ok(())
        } else {
            Err(TemplateError::Arity {
                function: function.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    let resolved = match function {
        "toJSON" => {
            arity(1)?;
            env.to_json(&args[0])?
        }
        "toFile" => {
            arity(1)?;
            env.to_file(&args[0])?
        }
        "toDir" => {
            arity(1)?;
            env.to_dir(&args[0])?
        }
        "join" => {
            arity(2)?;
            env.join(&args[0], &args[1])?
        }
        "toString" => {
            arity(1)?;
            env.stringify(&args[0])?
        }
        other => return Err(TemplateError::UnknownFunction(other.to_string())),
    };
    Ok(Value::String(resolved))
}

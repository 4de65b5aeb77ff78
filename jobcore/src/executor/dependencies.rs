use crate::errors::{JobError, Result};
use crate::specs::JobDependencyConfiguration;
use crate::template::ExpressionEnvironment;
use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{debug, error};

/// Copy or link one dependency into the working directory.
pub(super) fn materialize(
    template_env: &dyn ExpressionEnvironment,
    working_dir: &Path,
    dependency: &JobDependencyConfiguration,
) -> Result<()> {
    let source = absolute(PathBuf::from(dependency.source.evaluate(template_env)?))?;
    let target = working_dir.join(dependency.target.evaluate(template_env)?);

    if dependency.soft_link {
        debug!(source = %source.display(), target = %target.display(), "softlink dependency");
        if let Err(e) = soft_link(&source, &target) {
            error!(source = %source.display(), error = %e, "cannot create soft link");
        }
        Ok(())
    } else {
        debug!(source = %source.display(), target = %target.display(), "copy dependency");
        copy_path(&source, &target).map_err(|e| {
            error!(source = %source.display(), error = %e, "cannot copy");
            JobError::Dependency {
                path: source.clone(),
                source: e,
            }
        })
    }
}

fn absolute(path: PathBuf) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

fn soft_link(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(source, target)
}

/// Copy a file (keeping its permission bits) or a directory tree.
fn copy_path(source: &Path, target: &Path) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    if metadata.is_dir() {
        fs::create_dir_all(target)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_path(&entry.path(), &target.join(entry.file_name()))?;
        }
        fs::set_permissions(target, metadata.permissions())
    } else {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, target).map(|_| ())
    }
}

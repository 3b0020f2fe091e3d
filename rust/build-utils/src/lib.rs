use std::{env, path::PathBuf};

/// Locates the installation prefix of a native package.
///
/// Checks the directory named by `env_var` first, then each entry of
/// `default_paths`, and returns the first directory that contains
/// `check_file` (a path relative to the prefix, e.g.
/// `include/rdma/fabric.h`).
///
/// # Panics
/// Panics if no candidate directory contains `check_file`. Build scripts
/// are the only callers, so a panic surfaces as a normal build error.
pub fn find_package(
    env_var: &str,
    default_paths: &[&str],
    check_file: &str,
) -> PathBuf {
    println!("cargo:rerun-if-env-changed={}", env_var);
    env::var_os(env_var)
        .map(PathBuf::from)
        .into_iter()
        .chain(default_paths.iter().map(PathBuf::from))
        .find(|dir| dir.join(check_file).is_file())
        .unwrap_or_else(|| {
            panic!(
                "find_package: {} is not set and {} is not found in the default paths",
                env_var, check_file
            )
        })
}

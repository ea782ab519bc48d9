//! Utility functionality

use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::ops::Deref;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Splits `NAME=value` entries into a name to value mapping.
pub fn parse_env(envs: &[String]) -> HashMap<String, String> {
    envs.iter()
        .filter_map(|e| {
            let mut split = e.split('=');

            if let Some(key) = split.next() {
                let value: String = split.collect::<Vec<&str>>().join("=");
                Some((String::from(key), value))
            } else {
                None
            }
        })
        .collect()
}

pub fn to_cstring_vec(args: &[String]) -> Result<Vec<CString>> {
    args.iter()
        .map(|arg| CString::new(arg.as_str()).with_context(|| format!("invalid argument {:?}", arg)))
        .collect()
}

pub fn path_to_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).with_context(|| format!("invalid path {:?}", path))
}

/// Flattens a name to value mapping back into `NAME=value` pairs.
pub fn env_to_cstring_vec(env: &HashMap<String, String>) -> Result<Vec<CString>> {
    env.iter()
        .map(|(name, value)| {
            CString::new(format!("{}={}", name, value))
                .with_context(|| format!("invalid environment entry {:?}", name))
        })
        .collect()
}

pub struct TempDir {
    path: Option<PathBuf>,
}

impl TempDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let p = path.into();
        fs::create_dir_all(&p)
            .with_context(|| format!("failed to create directory {}", p.display()))?;
        Ok(Self { path: Some(p) })
    }

    pub fn path(&self) -> &Path {
        self.path
            .as_ref()
            .expect("temp dir has already been removed")
    }

    pub fn remove(&mut self) {
        if let Some(p) = &self.path {
            let _ = fs::remove_dir_all(p);
            self.path = None;
        }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        self.remove();
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

impl Deref for TempDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}

pub fn create_temp_dir(test_name: &str) -> Result<TempDir> {
    let dir = TempDir::new(std::env::temp_dir().join(test_name))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let key = "key".to_string();
        let value = "value=with=equals".to_string();
        let env_input = vec![format!("{}={}", key, value)];
        let env_output = parse_env(&env_input);
        assert_eq!(env_output.len(), 1);
        assert_eq!(env_output.get_key_value(&key), Some((&key, &value)));
    }

    #[test]
    fn test_env_to_cstring_vec() -> Result<()> {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "xterm".to_string());
        let pairs = env_to_cstring_vec(&env)?;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].to_str()?, "TERM=xterm");
        Ok(())
    }
}

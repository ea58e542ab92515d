//! Token command implementation.

use solojourn_sync::{JsonFileStore, SessionStorage};
use std::path::Path;
use std::sync::Arc;

/// Opens the session store at `path`, creating parent directories.
pub fn open_storage(path: &Path) -> Result<SessionStorage, Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SessionStorage::new(Arc::new(JsonFileStore::open(path)?)))
}

/// Stores a token.
pub fn set(path: &Path, token: &str) -> Result<(), Box<dyn std::error::Error>> {
    open_storage(path)?.set_user_token(token)?;
    println!("Token stored in {}", path.display());
    Ok(())
}

/// Prints the stored token.
pub fn get(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match open_storage(path)?.user_token()? {
        Some(token) => println!("{token}"),
        None => return Err(format!("No token stored in {}", path.display()).into()),
    }
    Ok(())
}

/// Removes the stored token.
pub fn clear(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    open_storage(path)?.remove_user_token()?;
    println!("Token removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        set(&path, "abc").unwrap();
        assert_eq!(open_storage(&path).unwrap().user_token().unwrap().as_deref(), Some("abc"));

        clear(&path).unwrap();
        assert!(get(&path).is_err());
    }
}

// Utility functions

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Convert a project directory string to a Path reference.
#[inline]
pub fn as_path(project_dir: &str) -> &Path {
    Path::new(project_dir)
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// The guarded maps (process registry, keyed locks) stay structurally valid
/// even if a thread panicked mid-update, so recovering is safe here.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Truncate a string to at most `max_chars` characters, appending an ellipsis
/// when anything was cut. Operates on chars so multi-byte text stays valid.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Turn a free-text topic into a filesystem-friendly slug.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= max_len {
            break;
        }
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "research".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_as_path() {
        let path = as_path("/home/user/research/topic");
        assert_eq!(path, Path::new("/home/user/research/topic"));
    }

    #[test]
    fn test_lock_mutex_recover_after_poison() {
        let mutex = Arc::new(Mutex::new(5));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        let guard = lock_mutex_recover(&mutex);
        assert_eq!(*guard, 5);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 4), "abcd...");
        // Multi-byte characters are never split
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rust async runtimes: a survey", 64), "rust-async-runtimes-a-survey");
        assert_eq!(slugify("  --  ", 64), "research");
        assert_eq!(slugify("Quantum Computing", 7), "quantum");
    }
}

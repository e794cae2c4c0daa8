use rpkv::{Config, KvStore, KvsEngine, LazyKvStore, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Result<KvStore> {
    KvStore::open(dir.path())
}

// Should get previously stored value
#[test]
fn get_stored_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;

    store.put("key1".to_owned(), "value1".to_owned())?;
    store.put("key2".to_owned(), "value2".to_owned())?;

    assert_eq!(store.get("key1")?, Some("value1".to_owned()));
    assert_eq!(store.get("key2")?, Some("value2".to_owned()));

    // Open from disk again and check persistent data
    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("key1")?, Some("value1".to_owned()));
    assert_eq!(store.get("key2")?, Some("value2".to_owned()));

    Ok(())
}

// Should overwrite existent value
#[test]
fn overwrite_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;

    store.put("key1".to_owned(), "value1".to_owned())?;
    assert_eq!(store.get("key1")?, Some("value1".to_owned()));
    store.put("key1".to_owned(), "value2".to_owned())?;
    assert_eq!(store.get("key1")?, Some("value2".to_owned()));

    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("key1")?, Some("value2".to_owned()));
    store.put("key1".to_owned(), "value3".to_owned())?;
    assert_eq!(store.get("key1")?, Some("value3".to_owned()));

    Ok(())
}

// Should get `None` when getting a non-existent key
#[test]
fn get_non_existent_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;

    assert_eq!(store.get("never")?, None);
    store.put("key1".to_owned(), "value1".to_owned())?;
    assert_eq!(store.get("key2")?, None);

    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("key2")?, None);

    Ok(())
}

#[test]
fn empty_value_is_not_absent() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;

    store.put("blank".to_owned(), String::new())?;
    assert_eq!(store.get("blank")?, Some(String::new()));
    assert_eq!(store.get("other")?, None);

    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("blank")?, Some(String::new()));

    Ok(())
}

#[test]
fn unicode_keys_and_values() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;

    store.put("clé".to_owned(), "rue des pets ☃".to_owned())?;
    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("clé")?, Some("rue des pets ☃".to_owned()));

    Ok(())
}

#[test]
fn walkthrough_scenario() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = LazyKvStore::new(Config::new(temp_dir.path()));

    let before = store.locate()?;
    assert!(!before.as_os_str().is_empty());

    store.put("a".to_owned(), "1".to_owned())?;
    assert_eq!(store.get("a")?, Some("1".to_owned()));
    store.put("a".to_owned(), "2".to_owned())?;
    assert_eq!(store.get("a")?, Some("2".to_owned()));
    assert_eq!(store.get("missing")?, None);

    assert_eq!(store.locate()?, before);

    Ok(())
}

#[test]
fn locate_is_idempotent() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = LazyKvStore::new(Config::new(temp_dir.path()));

    store.put("kept".to_owned(), "yes".to_owned())?;
    let first = store.locate()?;
    let second = store.locate()?;
    assert_eq!(first, second);
    assert_eq!(first, temp_dir.path().join("rpkv.db"));
    assert_eq!(store.get("kept")?, Some("yes".to_owned()));

    Ok(())
}

#[test]
fn backing_file_is_created_with_parents() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let path = temp_dir.path().join("nested").join("deeper").join("data.log");
    let store = KvStore::open(&path)?;

    assert_eq!(store.locate(), path.as_path());
    assert!(path.is_file());

    Ok(())
}

#[test]
fn trailing_separator_creates_directory() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let data_dir = temp_dir.path().join("data");
    let store = KvStore::open(format!("{}/", data_dir.display()))?;

    assert_eq!(store.locate(), data_dir.join("rpkv.db").as_path());
    store.put("key".to_owned(), "value".to_owned())?;
    drop(store);

    let store = KvStore::open(&data_dir)?;
    assert_eq!(store.get("key")?, Some("value".to_owned()));

    Ok(())
}

#[test]
fn concurrent_puts_to_distinct_keys() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = Arc::new(open(&temp_dir)?);

    let handles: Vec<_> = (0..16)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for i in 0..25 {
                    store.put(format!("key{}-{}", t, i), format!("value{}-{}", t, i))?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let check = |store: &KvStore| -> Result<()> {
        for t in 0..16 {
            for i in 0..25 {
                assert_eq!(
                    store.get(&format!("key{}-{}", t, i))?,
                    Some(format!("value{}-{}", t, i))
                );
            }
        }
        Ok(())
    };
    check(store.as_ref())?;

    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.len(), 16 * 25);
    check(&store)
}

#[test]
fn concurrent_puts_to_same_key_leave_one_whole_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = Arc::new(open(&temp_dir)?);

    let written: HashSet<String> = (0..16).map(|t| t.to_string().repeat(64)).collect();
    let handles: Vec<_> = written
        .iter()
        .cloned()
        .map(|value| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.put("shared".to_owned(), value))
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let value = store.get("shared")?.expect("shared key was written");
    assert!(written.contains(&value));

    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("shared")?, Some(value));

    Ok(())
}

#[test]
fn readers_run_alongside_writers() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = Arc::new(open(&temp_dir)?);
    store.put("stable".to_owned(), "fixed".to_owned())?;

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || -> Result<()> {
            for i in 0..200 {
                store.put("moving".to_owned(), format!("v{}", i))?;
            }
            Ok(())
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> Result<()> {
                for _ in 0..200 {
                    assert_eq!(store.get("stable")?, Some("fixed".to_owned()));
                    if let Some(value) = store.get("moving")? {
                        assert!(value.starts_with('v'));
                    }
                }
                Ok(())
            })
        })
        .collect();

    writer.join().expect("writer thread panicked")?;
    for reader in readers {
        reader.join().expect("reader thread panicked")?;
    }
    assert_eq!(store.get("moving")?, Some("v199".to_owned()));

    Ok(())
}

#[test]
fn truncated_last_record_is_dropped_on_reopen() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;
    store.put("first".to_owned(), "1".to_owned())?;
    store.put("second".to_owned(), "2".to_owned())?;
    store.put("third".to_owned(), "3".to_owned())?;
    let path = store.locate().to_path_buf();
    drop(store);

    // Cut the last record in half, as a crash mid-append would
    let len = fs::metadata(&path)?.len();
    let file = OpenOptions::new().write(true).open(&path)?;
    file.set_len(len - 6)?;
    drop(file);

    let store = open(&temp_dir)?;
    assert_eq!(store.get("first")?, Some("1".to_owned()));
    assert_eq!(store.get("second")?, Some("2".to_owned()));
    assert_eq!(store.get("third")?, None);

    store.put("fourth".to_owned(), "4".to_owned())?;
    drop(store);
    let store = open(&temp_dir)?;
    assert_eq!(store.get("second")?, Some("2".to_owned()));
    assert_eq!(store.get("fourth")?, Some("4".to_owned()));

    Ok(())
}

#[test]
fn garbage_tail_is_dropped_on_reopen() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = open(&temp_dir)?;
    store.put("key".to_owned(), "value".to_owned())?;
    let path = store.locate().to_path_buf();
    drop(store);

    let mut file = OpenOptions::new().append(true).open(&path)?;
    file.write_all(&[0xff; 13])?;
    drop(file);

    let store = open(&temp_dir)?;
    assert_eq!(store.get("key")?, Some("value".to_owned()));
    assert_eq!(store.len(), 1);

    Ok(())
}

#[test]
fn engines_are_interchangeable() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let eager: Box<dyn KvsEngine> = Box::new(open(&temp_dir)?);
    eager.put("from".to_owned(), "eager".to_owned())?;
    let path = eager.locate()?;
    drop(eager);

    let lazy: Box<dyn KvsEngine> = Box::new(LazyKvStore::new(Config::new(&path)));
    assert_eq!(lazy.get("from")?, Some("eager".to_owned()));
    assert_eq!(lazy.locate()?, path);

    Ok(())
}

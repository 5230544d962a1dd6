//! Command dispatch for the shell, kept separate from the I/O loop so it can
//! be exercised directly in tests.

use engine::{Engine, EngineError, IterOptions};

pub enum Outcome {
    Reply(String),
    Silent,
    Exit,
}

/// Executes one input line against the engine.
pub fn execute(engine: &Engine, line: &str) -> Outcome {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Outcome::Silent;
    };

    match cmd.to_uppercase().as_str() {
        "PUT" => {
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                return Outcome::Reply("ERR usage: PUT key value".to_string());
            };
            match engine.put(key.as_bytes(), value.as_bytes()) {
                Ok(()) => Outcome::Reply("OK".to_string()),
                Err(e) => Outcome::Reply(format!("ERR put failed: {e}")),
            }
        }
        "GET" => {
            let Some(key) = parts.next() else {
                return Outcome::Reply("ERR usage: GET key".to_string());
            };
            match engine.get(key.as_bytes()) {
                Ok(value) => Outcome::Reply(String::from_utf8_lossy(&value).into_owned()),
                Err(EngineError::KeyNotFound) => Outcome::Reply("(nil)".to_string()),
                Err(e) => Outcome::Reply(format!("ERR read failed: {e}")),
            }
        }
        "DEL" => {
            let Some(key) = parts.next() else {
                return Outcome::Reply("ERR usage: DEL key".to_string());
            };
            match engine.delete(key.as_bytes()) {
                Ok(()) => Outcome::Reply("OK".to_string()),
                Err(e) => Outcome::Reply(format!("ERR del failed: {e}")),
            }
        }
        "KEYS" => match engine.list_keys() {
            Ok(keys) => {
                let mut out = String::new();
                for key in &keys {
                    out.push_str(&String::from_utf8_lossy(key));
                    out.push('\n');
                }
                out.push_str(&format!("({} keys)", keys.len()));
                Outcome::Reply(out)
            }
            Err(e) => Outcome::Reply(format!("ERR keys failed: {e}")),
        },
        "SCAN" => {
            let prefix = parts.next().unwrap_or("").as_bytes().to_vec();
            let mut iter = match engine.iter(IterOptions {
                prefix,
                reverse: false,
            }) {
                Ok(iter) => iter,
                Err(e) => return Outcome::Reply(format!("ERR scan failed: {e}")),
            };
            let mut out = String::new();
            let mut count = 0usize;
            while iter.valid() {
                match iter.value() {
                    Ok(value) => {
                        out.push_str(&format!(
                            "{} -> {}\n",
                            String::from_utf8_lossy(iter.key()),
                            String::from_utf8_lossy(&value)
                        ));
                        count += 1;
                    }
                    // deleted under our feet; skip it
                    Err(EngineError::KeyNotFound) => {}
                    Err(e) => return Outcome::Reply(format!("ERR scan failed: {e}")),
                }
                iter.next();
            }
            out.push_str(&format!("({count} entries)"));
            Outcome::Reply(out)
        }
        "MERGE" => match engine.merge() {
            Ok(()) => Outcome::Reply("OK (new generation takes effect on next open)".to_string()),
            Err(e) => Outcome::Reply(format!("ERR merge failed: {e}")),
        },
        "STAT" => match engine.stat() {
            Ok(stat) => Outcome::Reply(format!(
                "keys={} segments={} reclaimable={}B disk={}B",
                stat.key_count, stat.data_file_count, stat.reclaimable_bytes, stat.disk_size
            )),
            Err(e) => Outcome::Reply(format!("ERR stat failed: {e}")),
        },
        "EXIT" | "QUIT" => Outcome::Exit,
        other => Outcome::Reply(format!("ERR unknown command {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::Options;
    use tempfile::tempdir;

    fn reply(engine: &Engine, line: &str) -> String {
        match execute(engine, line) {
            Outcome::Reply(text) => text,
            Outcome::Silent => String::new(),
            Outcome::Exit => "<exit>".to_string(),
        }
    }

    #[test]
    fn put_get_del_flow() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options::new(dir.path())).unwrap();

        assert_eq!(reply(&engine, "PUT name alice"), "OK");
        assert_eq!(reply(&engine, "GET name"), "alice");
        assert_eq!(reply(&engine, "DEL name"), "OK");
        assert_eq!(reply(&engine, "GET name"), "(nil)");
    }

    #[test]
    fn scan_honors_prefix() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options::new(dir.path())).unwrap();
        for key in ["user:1", "user:2", "other:1"] {
            reply(&engine, &format!("PUT {key} x"));
        }

        let out = reply(&engine, "SCAN user:");
        assert!(out.contains("user:1 -> x"));
        assert!(out.contains("user:2 -> x"));
        assert!(!out.contains("other:1"));
        assert!(out.ends_with("(2 entries)"));
    }

    #[test]
    fn malformed_and_unknown_commands() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(Options::new(dir.path())).unwrap();

        assert!(reply(&engine, "PUT onlykey").starts_with("ERR usage"));
        assert!(reply(&engine, "FROB x").starts_with("ERR unknown"));
        assert!(matches!(execute(&engine, "   "), Outcome::Silent));
        assert!(matches!(execute(&engine, "exit"), Outcome::Exit));
    }
}

// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use logroll::Level;
use logroll::Record;
use tempfile::TempDir;

fn log_lines(dir: &Path, prefix: &str) -> Vec<String> {
    let mut lines = vec![];
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let filename = entry.file_name().to_str().unwrap().to_string();
        if filename.starts_with(prefix) {
            let content = fs::read_to_string(entry.path()).unwrap();
            lines.extend(content.lines().map(str::to_string));
        }
    }
    lines
}

#[test]
fn test_file_named_after_current_day() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = logroll::rotating(temp_dir.path().join("logs").join("app.log"))
        .build()
        .unwrap();

    let path = logger.append().current_path().unwrap();
    let filename = path.file_name().unwrap().to_str().unwrap().to_string();
    let suffix = filename.strip_prefix("app.log.").unwrap();
    assert_eq!(suffix.len(), "2024-01-01".len());
    assert!(jiff::civil::Date::strptime("%Y-%m-%d", suffix).is_ok());
    logger.close().unwrap();
}

#[test]
fn test_concurrent_buffered_writers() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = Arc::new(
        logroll::buffered_rotating(temp_dir.path().join("app.log"))
            .capacity(16)
            .format("{message}")
            .build()
            .unwrap(),
    );

    let threads = 4;
    let per_thread = 250;
    let handles = (0..threads)
        .map(|t| {
            let logger = logger.clone();
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let record = Record::builder()
                        .level(Level::Info)
                        .payload(format!("thread {t} record {i}"))
                        .build();
                    logger.log(&record).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.close().unwrap();

    let lines = log_lines(temp_dir.path(), "app.log");
    assert_eq!(lines.len(), threads * per_thread);

    // each thread's records keep their relative order
    for t in 0..threads {
        let prefix = format!("thread {t} ");
        let ours = lines
            .iter()
            .filter(|line| line.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        let expected = (0..per_thread)
            .map(|i| format!("thread {t} record {i}"))
            .collect::<Vec<_>>();
        assert_eq!(ours, expected);
    }
}

#[test]
fn test_default_format() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = logroll::rotating(temp_dir.path().join("app.log"))
        .name("service")
        .build()
        .unwrap();

    let line = line!() + 1;
    logger.write(Level::Warning, "disk almost full").unwrap();
    logger.close().unwrap();

    let lines = log_lines(temp_dir.path(), "app.log");
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("[WARNING]["));
    assert!(
        lines[0].ends_with(&format!("] at rotating_files:{line}: disk almost full")),
        "{}",
        lines[0]
    );
}

#[test]
fn test_close_is_durable_and_idempotent() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = logroll::buffered_rotating(temp_dir.path().join("app.log"))
        .format("{level} {message}")
        .build()
        .unwrap();

    for i in 0..42 {
        logger.write(Level::Debug, format!("dropped {i}")).unwrap();
        logger.write(Level::Info, format!("kept {i}")).unwrap();
    }
    logger.close().unwrap();
    logger.close().unwrap();

    let lines = log_lines(temp_dir.path(), "app.log");
    let expected = (0..42).map(|i| format!("INFO kept {i}")).collect::<Vec<_>>();
    assert_eq!(lines, expected);
}

//! Integration tests for citydir
//!
//! These tests drive the stages end to end over real archives, a real child
//! process standing in for the entry parser, and real output files.

use citydir::{
    config::Config,
    parser::{BridgeError, EntryParserBridge, ParserCommand},
    pipeline::{
        GraphObject, NdjsonSink, ParseStage, PipelineError, TransformStage, LINES_FILENAME,
        MANIFEST_FILENAME, OBJECTS_FILENAME,
    },
    types::{LineRecord, Location, ParsedFields, ParsedLine, Subject, SubjectKind, VolumeManifest, Year},
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Reply the entry parser fixture gives to every line
const JOHN_SMITH_REPLY: &str = r#"{"subjects":[{"type":"primary","value":"John Smith","occupation":"carpenter"}],"locations":[{"value":"123 Broadway"}]}"#;

fn build_tar_gz(files: &[(&str, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &tar).unwrap();
    encoder.finish().unwrap()
}

/// A one-page hOCR document; each line is `(bbox, words)`
fn hocr(lines: &[([u32; 4], &str)]) -> String {
    let body: Vec<String> = lines
        .iter()
        .map(|(b, text)| {
            let words: Vec<String> = text
                .split_whitespace()
                .map(|w| format!("<span class='ocrx_word'>{}</span>", w))
                .collect();
            format!(
                "<span class='ocr_line' title='bbox {} {} {} {}'>{}</span>",
                b[0],
                b[1],
                b[2],
                b[3],
                words.join(" ")
            )
        })
        .collect();

    format!(
        "<html><body><div class='ocr_page' title='bbox 0 0 2000 3000'>{}</div></body></html>",
        body.join("\n")
    )
}

fn volume() -> VolumeManifest {
    VolumeManifest {
        uuid: "vol-1850".to_string(),
        year: Year::Range(1850, 1851),
        start_page: 21,
        end_page: 560,
        column_count: 2,
    }
}

/// Data directory with one downloaded volume (pages 20 and 25) and a street list
fn prepare_data_dir(temp_dir: &TempDir) -> (Config, PathBuf) {
    let data_dir = temp_dir.path().join("data");
    let download_dir = data_dir.join("download");
    std::fs::create_dir_all(&download_dir).unwrap();

    let archive = build_tar_gz(&[
        (
            "vol-1850/20.56886388.b1d2.processed.hocr",
            hocr(&[([100, 200, 900, 230], "Jane Doe 9 Bowery")]),
        ),
        (
            "vol-1850/25.56886389.c6725860.processed.hocr",
            hocr(&[([100, 200, 900, 230], "John Smith 123 Broadway")]),
        ),
    ]);
    std::fs::write(download_dir.join("vol-1850.tar.gz"), archive).unwrap();
    std::fs::write(
        download_dir.join(MANIFEST_FILENAME),
        serde_json::to_string(&vec![volume()]).unwrap(),
    )
    .unwrap();

    let streets = temp_dir.path().join("streets.txt");
    std::fs::write(&streets, "Broadway\nBowery\nBroome Street\n").unwrap();

    let mut config = Config::default();
    config.pipeline.data_dir = data_dir;
    config.resolver.streets = Some(streets);
    (config, download_dir)
}

#[cfg(unix)]
fn shell_parser(script: &str) -> ParserCommand {
    ParserCommand::new("/bin/sh").with_arg("-c").with_arg(script)
}

#[cfg(unix)]
fn fixed_reply_parser() -> ParserCommand {
    shell_parser(&format!(
        "while IFS= read -r line; do printf '%s\\n' '{}'; done",
        JOHN_SMITH_REPLY
    ))
}

fn read_objects(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[cfg(unix)]
#[tokio::test]
async fn test_end_to_end_single_person() {
    let temp_dir = TempDir::new().unwrap();
    let (config, download_dir) = prepare_data_dir(&temp_dir);

    let volumes = vec![Arc::new(volume())];
    let lines_path = config.pipeline.stage_dir("parse").join(LINES_FILENAME);

    let parse_stats = ParseStage::new(&config)
        .with_command(fixed_reply_parser())
        .run(&volumes, &download_dir, &lines_path)
        .await
        .unwrap();

    assert_eq!(parse_stats.volumes, 1);
    assert_eq!(parse_stats.pages, 2);
    assert_eq!(parse_stats.pages_out_of_range, 1);
    assert_eq!(parse_stats.entries, 1);

    let parsed: Vec<ParsedLine> = std::fs::read_to_string(&lines_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].line.page_num, 25);
    assert_eq!(parsed[0].line.text, "John Smith 123 Broadway");

    let transform_dir = config.pipeline.stage_dir("transform");
    std::fs::create_dir_all(&transform_dir).unwrap();
    let objects_path = transform_dir.join(OBJECTS_FILENAME);

    let stage = TransformStage::from_config(&config).unwrap();
    let mut sink = NdjsonSink::create(&objects_path).await.unwrap();
    let stats = stage.run(&lines_path, &mut sink).await.unwrap();
    assert_eq!(stats.persons, 1);

    let objects = read_objects(&objects_path);
    let persons: Vec<&serde_json::Value> = objects.iter().filter(|o| o["type"] == "object").collect();
    assert_eq!(persons.len(), 1);

    let person = &persons[0]["obj"];
    assert_eq!(person["id"], "1850-1851.25.100-200-900-230");
    assert_eq!(person["type"], "st:Person");
    assert_eq!(person["name"], "John Smith");
    assert_eq!(person["validSince"], 1850);
    assert_eq!(person["validUntil"], 1851);
    assert_eq!(person["data"]["pageNum"], 25);
    assert_eq!(person["data"]["addresses"][0]["street"], "Broadway");
    assert_eq!(person["data"]["addresses"][0]["number"], "123");
}

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_answers_every_record_in_order() {
    let mut bridge = EntryParserBridge::spawn(
        &shell_parser(
            r#"while IFS= read -r line; do printf '{"subjects":[],"locations":[{"value":"%s"}]}\n' "$line"; done"#,
        ),
        4,
    )
    .unwrap();
    let mut results = bridge.results().unwrap();

    const COUNT: u32 = 300;
    let feed = async {
        for i in 0..COUNT {
            bridge.submit(line_record(i)).await?;
        }
        bridge.finish().await
    };
    let collect = async {
        let mut received = Vec::new();
        while let Some(item) = results.next().await {
            received.push(item?);
        }
        Ok::<_, BridgeError>(received)
    };

    let ((), received) = tokio::try_join!(feed, collect).unwrap();

    assert_eq!(received.len(), COUNT as usize);
    for (i, parsed) in received.iter().enumerate() {
        assert_eq!(parsed.line.page_num, i as u32);
        assert_eq!(parsed.parsed.locations[0].value, format!("line {}", i));
    }
    assert!(bridge.wait().await.unwrap().success());
}

#[cfg(unix)]
fn line_record(i: u32) -> LineRecord {
    LineRecord {
        uuid: "vol".to_string(),
        year: Year::Single(1854),
        image_id: "1".to_string(),
        page_uuid: "p".to_string(),
        page_num: i,
        bbox: [0, 0, 1, 1],
        text: format!("line {}", i),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_submit_after_parser_exit_names_the_record() {
    // Answers one line with its input already closed, then quits
    let mut bridge = EntryParserBridge::spawn(
        &shell_parser(r#"IFS= read -r line; exec 0<&-; printf '{"subjects":[]}\n'"#),
        4,
    )
    .unwrap();
    let mut results = bridge.results().unwrap();

    bridge.submit(line_record(0)).await.unwrap();
    let first = results.next().await.unwrap().unwrap();
    assert_eq!(first.line, line_record(0));

    let err = bridge.submit(line_record(1)).await.unwrap_err();
    match err {
        BridgeError::ProcessExited { record_id, .. } => {
            assert_eq!(record_id, line_record(1).record_id());
        }
        other => panic!("unexpected error: {}", other),
    }

    // The failed record was withdrawn, so nothing is left unanswered
    let _ = bridge.finish().await;
    assert!(results.next().await.is_none());
    assert_eq!(bridge.submitted(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_undecodable_reply_aborts_parse() {
    let temp_dir = TempDir::new().unwrap();
    let (config, download_dir) = prepare_data_dir(&temp_dir);

    let lines_path = config.pipeline.stage_dir("parse").join(LINES_FILENAME);
    let result = ParseStage::new(&config)
        .with_command(shell_parser(
            "while IFS= read -r line; do echo 'Traceback (most recent call last):'; done",
        ))
        .run(&[Arc::new(volume())], &download_dir, &lines_path)
        .await;

    match result {
        Err(PipelineError::Bridge {
            source: BridgeError::Decode { line, .. },
            ..
        }) => assert!(line.starts_with("Traceback")),
        other => panic!("unexpected result: {:?}", other.map(|stats| stats.entries)),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_corrupt_archive_aborts_parse() {
    let temp_dir = TempDir::new().unwrap();
    let (config, download_dir) = prepare_data_dir(&temp_dir);

    let mut corrupt = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0x03];
    corrupt.extend_from_slice(&[0xff; 64]);
    std::fs::write(download_dir.join("vol-1850.tar.gz"), corrupt).unwrap();

    let lines_path = config.pipeline.stage_dir("parse").join(LINES_FILENAME);
    let result = ParseStage::new(&config)
        .with_command(fixed_reply_parser())
        .run(&[Arc::new(volume())], &download_dir, &lines_path)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, PipelineError::Archive { .. }), "unexpected error: {}", err);
    assert!(err.to_string().contains("vol-1850"));
}

#[tokio::test]
async fn test_missing_parser_script_fails_before_parsing() {
    let temp_dir = TempDir::new().unwrap();
    let (mut config, download_dir) = prepare_data_dir(&temp_dir);
    config.parser.path = temp_dir.path().join("no-such-parser");
    config.parser.training = temp_dir.path().join("training.csv");

    let lines_path = config.pipeline.stage_dir("parse").join(LINES_FILENAME);
    let result = ParseStage::new(&config)
        .run(&[Arc::new(volume())], &download_dir, &lines_path)
        .await;

    assert!(matches!(result, Err(PipelineError::ParserStart(_))));
}

#[tokio::test]
async fn test_transform_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let (config, _) = prepare_data_dir(&temp_dir);

    let entry = |page_num: u32, name: &str, locations: &[&str]| ParsedLine {
        line: LineRecord {
            uuid: "vol-1850".to_string(),
            year: Year::Range(1850, 1851),
            image_id: "56886389".to_string(),
            page_uuid: "c6725860".to_string(),
            page_num,
            bbox: [100, 200, 900, 230],
            text: format!("{} {}", name, locations.join(" ")),
        },
        parsed: ParsedFields {
            subjects: vec![Subject {
                kind: SubjectKind::Primary,
                value: name.to_string(),
                occupation: None,
            }],
            locations: locations
                .iter()
                .map(|value| Location {
                    value: value.to_string(),
                })
                .collect(),
        },
    };

    let mut input = String::new();
    for (i, (name, locations)) in [
        ("John Smith", vec!["123 Bway"]),
        ("Mary Jones", vec!["9 Nowhere Lane"]),
        ("Peter Brown", vec!["14 Broome st", "2 Bowery"]),
        ("Ann Lee", vec![]),
    ]
    .iter()
    .enumerate()
    {
        input.push_str(&serde_json::to_string(&entry(30 + i as u32, name, locations)).unwrap());
        input.push('\n');
    }
    input.push_str("{not json}\n");

    let lines_path = temp_dir.path().join(LINES_FILENAME);
    std::fs::write(&lines_path, input).unwrap();

    let stage = TransformStage::from_config(&config).unwrap();
    let mut outputs = Vec::new();
    for run in 0..2 {
        let path = temp_dir.path().join(format!("objects-{}.ndjson", run));
        let mut sink = NdjsonSink::create(&path).await.unwrap();
        stage.run(&lines_path, &mut sink).await.unwrap();
        outputs.push(std::fs::read(&path).unwrap());
    }

    assert!(!outputs[0].is_empty());
    assert_eq!(outputs[0], outputs[1]);

    let objects: Vec<GraphObject> = std::str::from_utf8(&outputs[0])
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let persons = objects
        .iter()
        .filter(|o| matches!(o, GraphObject::Object(_)))
        .count();
    assert_eq!(persons, 2);
}

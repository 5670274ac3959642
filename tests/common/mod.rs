use std::fs;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use data_encoding::HEXLOWER;
use rand::Rng;

pub fn setup() {
    let results_dir_path = PathBuf::from_str("./target/results/").unwrap();

    if !results_dir_path.exists() {
        fs::create_dir_all(&results_dir_path).unwrap_or_else(|_|
            panic!("Failed to create results directory: {:?}", results_dir_path)
        );
    } else {
        println!("Results directory exists at {:?}", results_dir_path);
    }
}

#[allow(dead_code)]
pub fn read_lines(path: &Path) -> Result<Vec<String>, anyhow::Error> {
    let reader = BufReader::new(File::open(path)?);
    let lines = reader.lines().map(|x| x.unwrap()).collect();
    Ok(lines)
}

#[allow(dead_code)]
pub fn temp_file_name(dir: &str) -> PathBuf {
    let mut result = PathBuf::from(dir);
    let name = HEXLOWER.encode(&rand::random::<[u8; 16]>());
    result.push(name);
    result
}

/// A fresh, empty directory under ./target/results/ so each test sees only its own files
#[allow(dead_code)]
pub fn test_dir() -> PathBuf {
    setup();
    let dir = temp_file_name("./target/results/");
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[allow(dead_code)]
pub fn dir_entries(dir: &Path) -> Result<Vec<String>, anyhow::Error> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().to_string());
    }
    names.sort();
    Ok(names)
}

/// All records of a delimited file parsed with the csv crate, header excluded when present
#[allow(dead_code)]
pub fn read_records(path: &Path, has_header: bool, delimiter: u8) -> Result<Vec<Vec<String>>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?.iter().map(|field| field.to_string()).collect());
    }
    Ok(records)
}

/// Random CSV content with a header: id, name, quoted free text which may contain the
/// delimiter, doubled quotes and line breaks
#[allow(dead_code)]
pub fn random_csv(records: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut content = String::from("id,name,comment\n");
    for i in 0..records {
        let id = rng.gen_range(0..records / 4 + 1);
        let comment = match rng.gen_range(0..4) {
            0 => format!("\"plain {}\"", i),
            1 => format!("\"with, comma {}\"", i),
            2 => format!("\"say \"\"hi\"\" {}\"", i),
            _ => format!("\"two\nlines {}\"", i),
        };
        content.push_str(&format!("{:05},name-{},{}\n", id, rng.gen_range(0..100), comment));
    }
    content
}

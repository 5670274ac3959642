use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Error;
use rand::Rng;
use simple_logger::SimpleLogger;

use delimited_file_sort::sort::Sort;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn create_input(path: &Path, records: usize) -> Result<(), Error> {
    let mut rng = rand::thread_rng();
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "id,city,note")?;
    for i in 0..records {
        writeln!(writer, "{:08},city-{},\"note {}, with a comma\"", rng.gen_range(0..records), rng.gen_range(0..50), i)?;
    }
    writer.flush()?;
    Ok(())
}

fn sort_by_id(input_path: &Path) -> Result<PathBuf, Error> {
    let mut sort = Sort::new(input_path.to_path_buf(), vec![0]);
    sort.with_chunk_size_bytes(1_000_000);
    sort.with_fan_in(4);
    Ok(sort.sort()?)
}

fn sort_by_city_then_id(input_path: &Path) -> Result<PathBuf, Error> {
    let mut sort = Sort::new(input_path.to_path_buf(), vec![1]);
    sort.add_key_column(0);
    sort.with_tasks(2);
    sort.with_chunk_size_bytes(1_000_000);
    Ok(sort.sort()?)
}

// cargo run -r --example sort_csv_file
pub fn main() -> Result<(), Error> {
    SimpleLogger::new().init()?;
    fs::create_dir_all("./target/demo")?;
    let by_id_path = PathBuf::from("./target/demo/by-id.csv");
    let by_city_path = PathBuf::from("./target/demo/by-city.csv");
    create_input(&by_id_path, 200_000)?;
    fs::copy(&by_id_path, &by_city_path)?;

    let sorted = sort_by_id(&by_id_path)?;
    log::info!("Sorted by id: {}", sorted.display());
    let sorted = sort_by_city_then_id(&by_city_path)?;
    log::info!("Sorted by city and id: {}", sorted.display());
    Ok(())
}

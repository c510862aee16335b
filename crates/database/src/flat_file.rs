//! Pipe-delimited flat files, one per table.

use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use model::{Cell, Record};

use crate::{validate_name, RowCount, Sink, SinkError};

pub const DELIMITER: u8 = b'|';

/// Writes `{dir}/{name}.csv` with a header row. Records whose key is already
/// present in the file are skipped.
#[derive(Debug, Clone)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }

    fn write<R: Record>(&self, records: &[R], name: &str) -> Result<RowCount, SinkError> {
        validate_name(name)?;
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let path = self.path(name);
        let header: Vec<&str> = R::COLUMNS.iter().map(|column| column.name).collect();
        let positions = R::key_positions();

        let is_new = match fs::metadata(&path) {
            Ok(metadata) => metadata.len() == 0,
            Err(why) if why.kind() == io::ErrorKind::NotFound => true,
            Err(why) => return Err(io_error(&path)(why)),
        };
        let mut stored = if is_new {
            HashSet::new()
        } else {
            stored_keys(&path, &header, &positions)?
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error(&path))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(&header).map_err(csv_error(&path))?;
        }

        let mut written = 0;
        for record in records {
            let row: Vec<String> = record.cells().iter().map(Cell::render).collect();
            let key: Vec<String> = positions.iter().map(|&i| row[i].clone()).collect();
            if !stored.insert(key) {
                continue;
            }
            writer.write_record(&row).map_err(csv_error(&path))?;
            written += 1;
        }
        writer.flush().map_err(io_error(&path))?;

        log::debug!("appended {written} of {} rows to {}", records.len(), path.display());
        Ok(written)
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn persist<R: Record + Sync>(
        &mut self,
        records: &[R],
        name: &str,
    ) -> Result<RowCount, SinkError> {
        // blocking, see `Sink`
        self.write(records, name)
    }
}

fn stored_keys(
    path: &Path,
    header: &[&str],
    positions: &[usize],
) -> Result<HashSet<Vec<String>>, SinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_path(path)
        .map_err(csv_error(path))?;

    let found = reader.headers().map_err(csv_error(path))?;
    if found.iter().ne(header.iter().copied()) {
        return Err(SinkError::HeaderMismatch {
            path: path.to_owned(),
            expected: header.iter().map(|name| (*name).to_owned()).collect(),
            found: found.iter().map(str::to_owned).collect(),
        });
    }

    reader
        .records()
        .map(|row| -> Result<Vec<String>, SinkError> {
            let row = row.map_err(csv_error(path))?;
            Ok(positions
                .iter()
                .map(|&i| row.get(i).unwrap_or_default().to_owned())
                .collect())
        })
        .collect()
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_owned(),
        source,
    }
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> SinkError + '_ {
    move |source| SinkError::Csv {
        path: path.to_owned(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use model::{network::Network, station::Station};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use utility::id::Id;

    use super::*;

    #[fixture]
    fn staging() -> TempDir {
        tempfile::tempdir().expect("temp dir")
    }

    fn network(id: &str) -> Network {
        Network {
            id: Id::new(id.to_owned()),
            name: "Citi Bike".to_owned(),
            latitude: 40.7,
            longitude: -74.0,
            city: "New York, NY".to_owned(),
            country: "US".to_owned(),
            company: vec!["NYC Bike Share, LLC".to_owned(), "Lyft".to_owned()],
        }
    }

    fn station(id: &str) -> Station {
        Station {
            id: Id::new(id.to_owned()),
            network_id: Id::new("citi-bike-nyc".to_owned()),
            timestamp: Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap(),
            name: "W 52 St | 11 Ave".to_owned(),
            latitude: 40.767,
            longitude: -73.993,
            free_bikes: None,
            empty_slots: Some(3),
            is_renting: true,
            is_returning: true,
            last_updated_s: 1738411200,
            address: None,
            post_code: None,
            payment: Vec::new(),
            has_payment_terminal: false,
            altitude: None,
            slots: 30,
            has_ebikes: None,
            num_ebikes: None,
        }
    }

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[rstest]
    #[tokio::test]
    async fn writes_header_and_rows(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path().join("nested/dir"));

        let written = sink.persist(&[network("citi-bike-nyc")], "networks").await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(
            lines(&sink.path("networks")),
            vec![
                "id|name|latitude|longitude|city|country|company",
                "citi-bike-nyc|Citi Bike|40.7|-74|New York, NY|US|NYC Bike Share, LLC&&Lyft",
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn persisting_twice_keeps_row_count(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());
        let networks = vec![network("a"), network("b")];

        assert_eq!(sink.persist(&networks, "networks").await.unwrap(), 2);
        assert_eq!(sink.persist(&networks, "networks").await.unwrap(), 0);

        assert_eq!(lines(&sink.path("networks")).len(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn only_new_keys_are_appended(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());
        sink.persist(&[network("a")], "networks").await.unwrap();

        let written = sink
            .persist(&[network("a"), network("c"), network("c")], "networks")
            .await
            .unwrap();

        assert_eq!(written, 1);
        let lines = lines(&sink.path("networks"));
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("c|"));
    }

    #[rstest]
    #[tokio::test]
    async fn empty_collection_still_creates_the_file(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());

        let stations: Vec<Station> = Vec::new();

        let written = sink.persist(&stations, "stations").await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(lines(&sink.path("stations")).len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn station_rows_escape_the_delimiter(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());

        sink.persist(&[station("s1")], "stations").await.unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .from_path(sink.path("stations"))
            .unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(row.len(), Station::COLUMNS.len());
        assert_eq!(&row[2], "2025-02-01T12:00:00+00:00");
        assert_eq!(&row[3], "W 52 St | 11 Ave");
        assert_eq!(&row[6], "");
        assert_eq!(&row[7], "3");
    }

    #[rstest]
    #[tokio::test]
    async fn header_mismatch_is_an_error(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());
        fs::write(sink.path("networks"), "id|label\nx|y\n").unwrap();

        let result = sink.persist(&[network("a")], "networks").await;

        assert!(matches!(result, Err(SinkError::HeaderMismatch { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn file_names_are_validated(staging: TempDir) {
        let mut sink = CsvSink::new(staging.path());

        let result = sink.persist(&[network("a")], "../networks").await;

        assert!(matches!(result, Err(SinkError::InvalidName(_))));
    }
}

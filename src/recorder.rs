use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use crate::drivers::LogError;
use crate::types::ChannelReading;

/// Appends one CSV row per tick to the day's `DO_log_<DDMMYYYY>.csv`.
///
/// The file is created (or truncated) when the logger opens and every row is
/// flushed as soon as it is written.
pub struct SampleLogger {
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
    channels: usize,
    rows: u64,
}

impl SampleLogger {
    pub fn file_name(date: NaiveDate) -> String {
        format!("DO_log_{}.csv", date.format("%d%m%Y"))
    }

    /// Header columns. A single channel is written without channel numbers.
    pub fn header(channels: usize) -> Vec<String> {
        let mut header = vec!["Date and Time".to_owned()];
        if channels == 1 {
            header.push("DO (% air sat)".to_owned());
            header.push("Flush Pump".to_owned());
        } else {
            for n in 1..=channels {
                header.push(format!("DO{n} (% air sat)"));
                header.push(format!("Flush Pump Ch{n}"));
            }
        }
        header
    }

    pub fn open(dir: &Path, date: NaiveDate, channels: usize) -> Result<Self, LogError> {
        let path = dir.join(Self::file_name(date));
        let open_err = |source| LogError::Open {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(open_err)?;
        let file = File::create(&path).map_err(open_err)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        writer.write_record(Self::header(channels))?;
        writer.flush()?;
        log::info!("Logging to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path,
            channels,
            rows: 0,
        })
    }

    pub fn write_row(
        &mut self,
        at: NaiveDateTime,
        readings: &[ChannelReading],
    ) -> Result<(), LogError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if readings.len() != self.channels {
            log::warn!(
                "log row has {} channels, header has {}",
                readings.len(),
                self.channels
            );
        }
        let mut record = Vec::with_capacity(1 + 2 * readings.len());
        record.push(at.format("%d/%m/%Y %H:%M:%S").to_string());
        for r in readings {
            record.push(format!("{:.3}", r.percent));
            record.push(if r.relay_on { "ON" } else { "OFF" }.to_owned());
        }
        writer.write_record(&record)?;
        writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), LogError> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            log::info!("Logging stopped ({} rows in {})", self.rows, self.path.display());
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn rows_written(&self) -> u64 {
        self.rows
    }
}

impl Drop for SampleLogger {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("oxyreg-log-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn reading(channel: usize, percent: f64, relay_on: bool) -> ChannelReading {
        ChannelReading {
            channel,
            volts: 0.0,
            percent,
            relay_on,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn file_is_named_after_the_day() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(SampleLogger::file_name(date), "DO_log_07032025.csv");
    }

    #[test]
    fn headers_for_both_variants() {
        assert_eq!(
            SampleLogger::header(1),
            vec!["Date and Time", "DO (% air sat)", "Flush Pump"]
        );
        let four = SampleLogger::header(4);
        assert_eq!(four.len(), 9);
        assert_eq!(four[1], "DO1 (% air sat)");
        assert_eq!(four[8], "Flush Pump Ch4");
    }

    #[test]
    fn rows_are_written_and_flushed() {
        let dir = scratch("rows");
        let date = at(0, 0, 0).date();
        let mut logger = SampleLogger::open(&dir, date, 2).unwrap();
        logger
            .write_row(at(9, 5, 1), &[reading(0, 50.0, true), reading(1, 71.23456, false)])
            .unwrap();
        // readable before close: every row is flushed
        let contents = fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Date and Time,DO1 (% air sat),Flush Pump Ch1,DO2 (% air sat),Flush Pump Ch2",
                "07/03/2025 09:05:01,50.000,ON,71.235,OFF",
            ]
        );
        assert_eq!(logger.rows_written(), 1);
        logger.close().unwrap();
        assert!(logger.writer.is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopening_the_same_day_starts_over() {
        let dir = scratch("reopen");
        let date = at(0, 0, 0).date();
        let mut first = SampleLogger::open(&dir, date, 1).unwrap();
        first.write_row(at(8, 0, 0), &[reading(0, 10.0, true)]).unwrap();
        first.close().unwrap();
        let mut second = SampleLogger::open(&dir, date, 1).unwrap();
        second.write_row(at(9, 0, 0), &[reading(0, 20.0, false)]).unwrap();
        second.close().unwrap();
        let contents = fs::read_to_string(dir.join("DO_log_07032025.csv")).unwrap();
        assert_eq!(
            contents.lines().collect::<Vec<_>>(),
            vec![
                "Date and Time,DO (% air sat),Flush Pump",
                "07/03/2025 09:00:00,20.000,OFF",
            ]
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn writes_after_close_are_ignored() {
        let dir = scratch("closed");
        let mut logger = SampleLogger::open(&dir, at(0, 0, 0).date(), 1).unwrap();
        logger.close().unwrap();
        logger.write_row(at(1, 0, 0), &[reading(0, 1.0, false)]).unwrap();
        assert_eq!(logger.rows_written(), 0);
        fs::remove_dir_all(&dir).ok();
    }
}

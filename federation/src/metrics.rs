use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;

/// Writes run output to stdout and, when an outfile is given, mirrors every
/// line into it (the original scripts' `print2`).
pub struct OutputWriter {
    file: Option<File>,
    quiet: bool,
}

impl OutputWriter {
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(File::create(p)?),
            None => None,
        };
        Ok(Self { file, quiet: false })
    }

    /// Suppresses stdout, keeping only the file copy. Used by tests.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn line(&mut self, text: &str) -> Result<()> {
        if !self.quiet {
            println!("{text}");
        }
        if let Some(f) = self.file.as_mut() {
            writeln!(f, "{text}")?;
        }
        Ok(())
    }
}

/// One per-client CSV line, emitted for every sampled client each round.
pub struct ClientRow {
    pub round: usize,
    pub client_id: usize,
    pub train_size: usize,
    pub dl_bits: f64,
    pub ul_bits: f64,
    pub compute_ms: u128,
    pub loss: f32,
    pub sparsity: f32,
}

impl ClientRow {
    pub const HEADER: &'static str =
        "round,client,train_size,download_bits,upload_bits,compute_ms,loss,sparsity";

    pub fn csv(&self) -> String {
        format!(
            "{},{},{},{:.0},{:.0},{},{:.6},{:.4}",
            self.round,
            self.client_id,
            self.train_size,
            self.dl_bits,
            self.ul_bits,
            self.compute_ms,
            self.loss,
            self.sparsity
        )
    }
}

/// One evaluation checkpoint: accuracy over all clients plus the traffic
/// accumulated since the previous checkpoint.
pub struct EvalPoint {
    pub round: usize,
    pub accuracy: f32,
    pub co_accuracy: Option<f32>,
    pub dl_bits: f64,
    pub ul_bits: f64,
    pub sparsity: f32,
}

/// Evaluation checkpoints across the run, written out as `<outfile>.csv`.
#[derive(Default)]
pub struct History {
    points: Vec<EvalPoint>,
}

impl History {
    pub fn push(&mut self, point: EvalPoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[EvalPoint] {
        &self.points
    }

    /// History file path for a given outfile: the outfile with `.csv`
    /// appended.
    pub fn path_for(outfile: &Path) -> PathBuf {
        let mut name = outfile.as_os_str().to_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut f = File::create(path)?;
        writeln!(
            f,
            "round,accuracy,co_accuracy,download_bits,upload_bits,sparsity"
        )?;
        for p in &self.points {
            let co = p
                .co_accuracy
                .map(|a| format!("{a:.4}"))
                .unwrap_or_default();
            writeln!(
                f,
                "{},{:.4},{},{:.0},{:.0},{:.4}",
                p.round, p.accuracy, co, p.dl_bits, p.ul_bits, p.sparsity
            )?;
        }
        Ok(())
    }
}

/// Mean/std/min/max over a sample of per-client values.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
}

impl Stats {
    pub fn from_values(values: &[f32]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        Self {
            mean,
            std: var.sqrt(),
            min: values.iter().copied().fold(f32::INFINITY, f32::min),
            max: values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// Final run summary, printed as text and as one JSON line.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rounds: usize,
    pub accuracy: Stats,
    pub co_accuracy: Option<Stats>,
    pub sparsity: f32,
    pub dl_bits: f64,
    pub ul_bits: f64,
}

impl RunSummary {
    pub fn write(&self, out: &mut OutputWriter) -> Result<()> {
        out.line("--- summary ---")?;
        out.line(&format!(
            "accuracy: mean {:.4} std {:.4} min {:.4} max {:.4}",
            self.accuracy.mean, self.accuracy.std, self.accuracy.min, self.accuracy.max
        ))?;
        if let Some(co) = &self.co_accuracy {
            out.line(&format!(
                "co-accuracy: mean {:.4} std {:.4} min {:.4} max {:.4}",
                co.mean, co.std, co.min, co.max
            ))?;
        }
        out.line(&format!("final sparsity: {:.4}", self.sparsity))?;
        out.line(&format!(
            "traffic: download {:.0} bits, upload {:.0} bits",
            self.dl_bits, self.ul_bits
        ))?;
        out.line(&serde_json::to_string(self).map_err(std::io::Error::other)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_basics() {
        let s = Stats::from_values(&[1.0, 2.0, 3.0]);
        assert!((s.mean - 2.0).abs() < 1e-6);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 3.0);
        assert!((s.std - (2.0f32 / 3.0).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn stats_of_empty_sample() {
        let s = Stats::from_values(&[]);
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.std, 0.0);
    }

    #[test]
    fn client_row_matches_header_arity() {
        let row = ClientRow {
            round: 3,
            client_id: 7,
            train_size: 40,
            dl_bits: 1024.0,
            ul_bits: 512.0,
            compute_ms: 12,
            loss: 0.5,
            sparsity: 0.1,
        };
        assert_eq!(
            row.csv().split(',').count(),
            ClientRow::HEADER.split(',').count()
        );
    }

    #[test]
    fn history_path_appends_csv() {
        let p = History::path_for(Path::new("/tmp/run.log"));
        assert_eq!(p, PathBuf::from("/tmp/run.log.csv"));
    }

    #[test]
    fn history_csv_round_trips_fields() {
        let mut h = History::default();
        h.push(EvalPoint {
            round: 10,
            accuracy: 0.5,
            co_accuracy: None,
            dl_bits: 100.0,
            ul_bits: 50.0,
            sparsity: 0.1,
        });
        let path = std::env::temp_dir().join("feddst_history_test.csv");
        h.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("round,accuracy"));
        assert!(text.contains("10,0.5000,,100,50,0.1000"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writer_mirrors_to_file() {
        let path = std::env::temp_dir().join("feddst_writer_test.log");
        let mut out = OutputWriter::new(Some(&path)).unwrap().quiet();
        out.line("hello").unwrap();
        drop(out);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        std::fs::remove_file(&path).ok();
    }
}

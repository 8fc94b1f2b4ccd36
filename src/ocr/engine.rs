use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use image::GrayImage;
use tempfile::NamedTempFile;
use wait_timeout::ChildExt;

use super::{Recognition, Recognizer, TextBox};
use crate::config::RecognizerConfig;
use crate::error::RecognitionError;

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 512;

/// Recognizer backed by the Tesseract command line tool.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    executable: PathBuf,
    language: String,
    psm: u8,
    timeout: Duration,
    concurrent_safe: bool,
}

impl TesseractRecognizer {
    pub fn new(config: &RecognizerConfig) -> Self {
        Self {
            executable: PathBuf::from(&config.executable),
            language: config.language.clone(),
            psm: config.psm,
            timeout: Duration::from_millis(config.timeout_ms),
            concurrent_safe: config.concurrent_safe,
        }
    }

    /// Runs `tesseract --version` to check the executable can be started.
    pub fn is_available(&self) -> bool {
        let child = Command::new(&self.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let Ok(mut child) = child else {
            return false;
        };

        match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status.success(),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                false
            }
        }
    }

    fn run_tsv(&self, img: &GrayImage) -> Result<String, RecognitionError> {
        // Save image to temporary file
        let temp_input = tempfile::Builder::new().suffix(".png").tempfile()?;
        img.save(temp_input.path())?;

        // Tesseract appends .tsv to the output base
        let temp_output = NamedTempFile::new()?;
        let output_base = temp_output.path().to_string_lossy().to_string();

        let mut child = Command::new(&self.executable)
            .arg(temp_input.path())
            .arg(&output_base)
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("tsv")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr while waiting, or a chatty engine blocks on a full pipe
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RecognitionError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            let stderr = stderr
                .and_then(|reader| reader.join().ok())
                .unwrap_or_default();
            let message: String = String::from_utf8_lossy(&stderr)
                .trim()
                .chars()
                .take(STDERR_EXCERPT)
                .collect();
            return Err(RecognitionError::Engine(format!(
                "tesseract exited with {}: {}",
                status, message
            )));
        }

        let tsv_path = format!("{}.tsv", output_base);
        let tsv = std::fs::read_to_string(&tsv_path);
        let _ = std::fs::remove_file(&tsv_path);
        Ok(tsv?)
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, image: &GrayImage) -> Result<Recognition, RecognitionError> {
        let tsv = self.run_tsv(image)?;
        Ok(parse_tsv_output(&tsv))
    }

    fn concurrent_safe(&self) -> bool {
        self.concurrent_safe
    }
}

#[derive(Debug)]
struct LineBuilder {
    key: (i32, i32, i32),
    words: Vec<String>,
    conf_sum: f32,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl LineBuilder {
    fn finish(self) -> TextBox {
        let confidence = self.conf_sum / self.words.len() as f32;
        TextBox {
            text: self.words.join(" "),
            confidence,
            left: self.left,
            top: self.top,
            width: self.right - self.left,
            height: self.bottom - self.top,
        }
    }
}

/// Parses Tesseract TSV output: words (level 5) grouped into lines.
///
/// Line confidence is the mean of its word confidences, overall confidence
/// the mean over lines. Boxes are in the coordinates of the input image.
fn parse_tsv_output(tsv: &str) -> Recognition {
    let mut lines: Vec<TextBox> = Vec::new();
    let mut current: Option<LineBuilder> = None;

    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let level: i32 = fields[0].parse().unwrap_or(-1);
        let text = fields[11].trim();
        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        if level != 5 || text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        let left: u32 = fields[6].parse().unwrap_or(0);
        let top: u32 = fields[7].parse().unwrap_or(0);
        let right = left + fields[8].parse::<u32>().unwrap_or(0);
        let bottom = top + fields[9].parse::<u32>().unwrap_or(0);

        match current.as_mut() {
            Some(builder) if builder.key == key => {
                builder.words.push(text.to_string());
                builder.conf_sum += conf;
                builder.left = builder.left.min(left);
                builder.top = builder.top.min(top);
                builder.right = builder.right.max(right);
                builder.bottom = builder.bottom.max(bottom);
            }
            _ => {
                if let Some(done) = current.take() {
                    lines.push(done.finish());
                }
                current = Some(LineBuilder {
                    key,
                    words: vec![text.to_string()],
                    conf_sum: conf,
                    left,
                    top,
                    right,
                    bottom,
                });
            }
        }
    }

    if let Some(done) = current {
        lines.push(done.finish());
    }

    let confidence = if lines.is_empty() {
        0.0
    } else {
        lines.iter().map(|l| l.confidence).sum::<f32>() / lines.len() as f32
    };
    let text = lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Recognition {
        text,
        confidence,
        boxes: lines,
    }
}

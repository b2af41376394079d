//! Conversion sessions: options, cancellation and the record pipeline

use crate::bitmap::{BitmapDecoder, DibDecoder};
use crate::canvas::{PixelBuffer, Rasterizer};
use crate::encoder;
use crate::error::{ConvertError, ConvertResult, RecordError, Warning, WarningKind};
use crate::font_utils::{GlyphOutlineProvider, TtfGlyphProvider};
use crate::mapper::CoordinateMapper;
use crate::reader::RecordReader;
use crate::record::Record;
use crate::state::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

pub const DEFAULT_DPI: u32 = 300;

/// Interpolation used when bitmaps are scaled onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    #[default]
    Bilinear,
    Nearest,
}

/// What happens to record-level problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedRecordPolicy {
    /// Log them only
    #[default]
    Skip,
    /// Log them and return them with the image
    CollectWarnings,
}

/// Cooperative cancellation flag shared between a caller and running conversions
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn default_dpi() -> u32 {
    DEFAULT_DPI
}

/// Conversion settings.
///
/// The serializable part can be read from JSON; collaborators and the
/// cancellation token are runtime only.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConvertOptions {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default)]
    pub on_unsupported_record: UnsupportedRecordPolicy,
    #[serde(default)]
    pub resample: ResampleFilter,
    #[serde(skip)]
    pub cancellation: Option<CancellationToken>,
    /// Defaults to a shared [`TtfGlyphProvider`] over the system fonts
    #[serde(skip)]
    pub glyphs: Option<Arc<dyn GlyphOutlineProvider>>,
    /// Defaults to [`DibDecoder`]
    #[serde(skip)]
    pub bitmaps: Option<Arc<dyn BitmapDecoder>>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            on_unsupported_record: UnsupportedRecordPolicy::Skip,
            resample: ResampleFilter::Bilinear,
            cancellation: None,
            glyphs: None,
            bitmaps: None,
        }
    }
}

impl fmt::Debug for ConvertOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertOptions")
            .field("dpi", &self.dpi)
            .field("on_unsupported_record", &self.on_unsupported_record)
            .field("resample", &self.resample)
            .field("cancellation", &self.cancellation)
            .field("glyphs", &self.glyphs.as_ref().map(|_| "custom"))
            .field("bitmaps", &self.bitmaps.as_ref().map(|_| "custom"))
            .finish()
    }
}

impl ConvertOptions {
    pub fn with_dpi(dpi: u32) -> Self {
        Self {
            dpi,
            ..Self::default()
        }
    }

    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> ConvertResult<Self> {
        let options: ConvertOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ConvertResult<()> {
        if self.dpi == 0 {
            return Err(ConvertError::Config("dpi must be positive".to_string()));
        }
        Ok(())
    }

    fn glyph_provider(&self) -> Arc<dyn GlyphOutlineProvider> {
        match &self.glyphs {
            Some(glyphs) => Arc::clone(glyphs),
            None => default_glyphs(),
        }
    }

    fn bitmap_decoder(&self) -> Arc<dyn BitmapDecoder> {
        match &self.bitmaps {
            Some(bitmaps) => Arc::clone(bitmaps),
            None => Arc::new(DibDecoder),
        }
    }
}

/// Font discovery walks directories once per process
fn default_glyphs() -> Arc<dyn GlyphOutlineProvider> {
    static GLYPHS: OnceLock<Arc<dyn GlyphOutlineProvider>> = OnceLock::new();
    Arc::clone(GLYPHS.get_or_init(|| Arc::new(TtfGlyphProvider::discover())))
}

/// Painted canvas before encoding
#[derive(Debug)]
pub struct Rendering {
    pub buffer: PixelBuffer,
    pub warnings: Vec<Warning>,
    /// The stream ended before its EOF record
    pub truncated: bool,
}

/// Result of one successful conversion
#[derive(Debug, Clone)]
pub struct Conversion {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub warnings: Vec<Warning>,
    pub truncated: bool,
}

impl Conversion {
    pub fn to_base64(&self) -> String {
        encoder::to_base64(&self.png)
    }

    pub fn to_data_uri(&self) -> String {
        encoder::to_data_uri(&self.png)
    }
}

/// Runs EMF buffers through reader, state machine, rasterizer and encoder
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Convert one EMF buffer to PNG
    pub fn convert(&self, data: &[u8]) -> ConvertResult<Conversion> {
        let rendering = self.render(data)?;
        if self.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }
        let png = encoder::encode(&rendering.buffer)?;
        Ok(Conversion {
            png,
            width: rendering.buffer.width(),
            height: rendering.buffer.height(),
            warnings: rendering.warnings,
            truncated: rendering.truncated,
        })
    }

    /// Paint one EMF buffer without encoding it
    pub fn render(&self, data: &[u8]) -> ConvertResult<Rendering> {
        self.options.validate()?;
        let mut reader = RecordReader::new(data)?;
        if let Some(token) = &self.options.cancellation {
            reader = reader.with_cancellation(token.clone());
        }
        let header = reader.header().clone();
        let mapper = CoordinateMapper::new(&header, self.options.dpi)?;
        let (width, height) = mapper.canvas_size();
        log::info!(
            "Converting EMF: {} records declared, {}x{} px at {} dpi",
            header.records,
            width,
            height,
            self.options.dpi
        );

        let mut rasterizer = Rasterizer::new(
            PixelBuffer::new(width, height)?,
            self.options.glyph_provider(),
            self.options.bitmap_decoder(),
            self.options.resample,
        );
        let mut sm = StateMachine::new(width, height);
        let mut warnings = Vec::new();
        let mut truncated = false;
        let mut kinds = Vec::new();
        let mut count = 0usize;

        for item in &mut reader {
            match item {
                Ok(entry) => {
                    count += 1;
                    log::debug!(
                        "{} at byte {}",
                        crate::emf_records::get_record_type_name(entry.record_type),
                        entry.offset
                    );
                    if let Record::Unsupported { .. } = entry.record {
                        kinds.push(WarningKind::UnsupportedRecord);
                    }
                    if let Some(position) = rasterizer.paint(&entry.record, &sm, &mapper, &mut kinds) {
                        sm.set_current_position(position);
                    }
                    sm.apply(&entry.record, &mapper, &mut kinds);
                    for kind in kinds.drain(..) {
                        self.report(
                            &mut warnings,
                            Warning {
                                offset: entry.offset,
                                record_type: entry.record_type,
                                kind,
                            },
                        );
                    }
                }
                Err(RecordError::Truncated { offset }) => {
                    truncated = true;
                    self.report(
                        &mut warnings,
                        Warning {
                            offset,
                            record_type: 0,
                            kind: WarningKind::Truncated,
                        },
                    );
                }
                Err(RecordError::Malformed {
                    offset,
                    record_type,
                    reason,
                }) => self.report(
                    &mut warnings,
                    Warning {
                        offset,
                        record_type,
                        kind: WarningKind::Malformed(reason),
                    },
                ),
                Err(RecordError::Cancelled { offset }) => {
                    log::info!("Conversion cancelled at byte {}", offset);
                    return Err(ConvertError::Cancelled);
                }
            }
        }

        log::info!(
            "Rendered {} records, {} warnings{}",
            count,
            warnings.len(),
            if truncated { ", stream truncated" } else { "" }
        );
        Ok(Rendering {
            buffer: rasterizer.into_buffer(),
            warnings,
            truncated,
        })
    }

    fn report(&self, warnings: &mut Vec<Warning>, warning: Warning) {
        log::warn!("{}", warning);
        if self.options.on_unsupported_record == UnsupportedRecordPolicy::CollectWarnings {
            warnings.push(warning);
        }
    }

    /// Convert independent buffers in parallel; results keep the input order
    pub fn convert_many<T: AsRef<[u8]> + Sync>(&self, inputs: &[T]) -> Vec<ConvertResult<Conversion>> {
        if inputs.is_empty() {
            return Vec::new();
        }
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(inputs.len());
        let next = AtomicUsize::new(0);
        let mut results: Vec<Option<ConvertResult<Conversion>>> = inputs.iter().map(|_| None).collect();

        thread::scope(|scope| {
            let next = &next;
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(input) = inputs.get(i) else {
                                break;
                            };
                            done.push((i, self.convert(input.as_ref())));
                        }
                        done
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, result) in done {
                            results[i] = Some(result);
                        }
                    }
                    Err(_) => log::warn!("Conversion worker panicked"),
                }
            }
        });

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(ConvertError::Encode("conversion worker panicked".to_string()))))
            .collect()
    }
}

/// Convert with the given options
pub fn convert(data: &[u8], options: &ConvertOptions) -> ConvertResult<Conversion> {
    Converter::new(options.clone()).convert(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emf_records::*;
    use crate::font_utils::{FontDescriptor, FontMetrics, GlyphOutline};

    struct NoGlyphs;

    impl GlyphOutlineProvider for NoGlyphs {
        fn outline(&self, _font: &FontDescriptor, _ch: char) -> Option<GlyphOutline> {
            None
        }

        fn metrics(&self, _font: &FontDescriptor) -> FontMetrics {
            FontMetrics::default()
        }
    }

    fn record(record_type: u32, payload: &[i32]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&record_type.to_le_bytes());
        out.extend_from_slice(&(8 + payload.len() as u32 * 4).to_le_bytes());
        for v in payload {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// 100x100 px picture at 96 dpi
    fn emf(body: &[Vec<u8>]) -> Vec<u8> {
        let len = 88 + body.iter().map(|r| r.len()).sum::<usize>() as u32;
        let mut out = Vec::new();
        for v in [EMR_HEADER, 88] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0i32, 0, 99, 99, 0, 0, 2646, 2646] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in [ENHMETA_SIGNATURE, 0x10000, len, body.len() as u32 + 1] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[0; 4]);
        for v in [0u32, 0, 0, 1920, 1920, 508, 508] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for r in body {
            out.extend_from_slice(r);
        }
        out
    }

    fn options(policy: UnsupportedRecordPolicy) -> ConvertOptions {
        ConvertOptions {
            dpi: 96,
            on_unsupported_record: policy,
            glyphs: Some(Arc::new(NoGlyphs)),
            ..ConvertOptions::default()
        }
    }

    fn sample() -> Vec<u8> {
        emf(&[
            record(EMR_RECTANGLE, &[10, 10, 50, 50]),
            record(0x7777, &[1, 2]),
            record(EMR_EOF, &[0, 16, 20]),
        ])
    }

    #[test]
    fn test_options_from_json_defaults() {
        let options = ConvertOptions::from_json("{}").unwrap();
        assert_eq!(options.dpi, 300);
        assert_eq!(options.on_unsupported_record, UnsupportedRecordPolicy::Skip);
        assert_eq!(options.resample, ResampleFilter::Bilinear);

        let options =
            ConvertOptions::from_json(r#"{"dpi": 150, "on_unsupported_record": "collect_warnings", "resample": "nearest"}"#)
                .unwrap();
        assert_eq!(options.dpi, 150);
        assert_eq!(options.on_unsupported_record, UnsupportedRecordPolicy::CollectWarnings);
        assert_eq!(options.resample, ResampleFilter::Nearest);
    }

    #[test]
    fn test_options_rejects_zero_dpi() {
        assert!(matches!(ConvertOptions::from_json(r#"{"dpi": 0}"#), Err(ConvertError::Config(_))));
        assert!(matches!(ConvertOptions::from_json("[1]"), Err(ConvertError::Config(_))));
    }

    #[test]
    fn test_policy_controls_warnings() {
        let data = sample();
        let skipped = convert(&data, &options(UnsupportedRecordPolicy::Skip)).unwrap();
        assert!(skipped.warnings.is_empty());

        let collected = convert(&data, &options(UnsupportedRecordPolicy::CollectWarnings)).unwrap();
        assert_eq!(collected.warnings.len(), 1);
        assert_eq!(collected.warnings[0].kind, WarningKind::UnsupportedRecord);
        assert_eq!(collected.warnings[0].record_type, 0x7777);
        assert_eq!(collected.warnings[0].offset, 88 + 24);
        assert_eq!((collected.width, collected.height), (100, 100));
        assert!(!collected.truncated);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let options = ConvertOptions {
            cancellation: Some(token.clone()),
            ..options(UnsupportedRecordPolicy::Skip)
        };
        assert!(token.is_cancelled());
        assert!(matches!(convert(&sample(), &options), Err(ConvertError::Cancelled)));
    }

    #[test]
    fn test_truncated_stream() {
        let mut data = sample();
        data.truncate(data.len() - 20);
        let result = convert(&data, &options(UnsupportedRecordPolicy::CollectWarnings)).unwrap();
        assert!(result.truncated);
        assert_eq!(result.warnings.last().map(|w| &w.kind), Some(&WarningKind::Truncated));
    }

    #[test]
    fn test_convert_many_keeps_order() {
        let good = sample();
        let bad = vec![0u8; 10];
        let converter = Converter::new(options(UnsupportedRecordPolicy::Skip));
        let results = converter.convert_many(&[good.clone(), bad, good]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ConvertError::Format { .. })));
        assert_eq!(results[0].as_ref().unwrap().png, results[2].as_ref().unwrap().png);
    }
}

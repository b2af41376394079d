//! EMF header validation and record stream decoding

use crate::converter::CancellationToken;
use crate::emf_records::{self, *};
use crate::error::{ConvertError, ConvertResult, RecordError};
use crate::record::*;
use crate::types::{ColorRef, PointL, RectL, SizeL, XForm};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Check if data starts like an EMF header record
pub fn is_emf_format(data: &[u8]) -> bool {
    data.len() >= 44
        && data[0..4] == [0x01, 0x00, 0x00, 0x00]
        && u32::from_le_bytes([data[40], data[41], data[42], data[43]]) == ENHMETA_SIGNATURE
}

/// Parse and validate the ENHMETAHEADER at the start of `data`
pub fn parse_header(data: &[u8]) -> ConvertResult<EmfHeader> {
    if data.len() < MIN_HEADER_SIZE as usize {
        return Err(ConvertError::format(
            0,
            format!("buffer of {} bytes is shorter than the EMF header", data.len()),
        ));
    }

    let mut cursor = Cursor::new(data);
    let record_type = cursor.read_u32::<LittleEndian>()?;
    if record_type != EMR_HEADER {
        return Err(ConvertError::format(0, format!("first record has type {}, expected EMR_HEADER", record_type)));
    }
    let size = cursor.read_u32::<LittleEndian>()?;
    let bounds = read_rect(&mut cursor)?;
    let frame = read_rect(&mut cursor)?;
    let signature = cursor.read_u32::<LittleEndian>()?;
    if signature != ENHMETA_SIGNATURE {
        return Err(ConvertError::format(40, format!("bad signature 0x{:08X}", signature)));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    let bytes = cursor.read_u32::<LittleEndian>()?;
    let records = cursor.read_u32::<LittleEndian>()?;
    let handles = cursor.read_u16::<LittleEndian>()?;
    let _reserved = cursor.read_u16::<LittleEndian>()?;
    let description_len = cursor.read_u32::<LittleEndian>()?;
    let description_off = cursor.read_u32::<LittleEndian>()?;
    let pal_entries = cursor.read_u32::<LittleEndian>()?;
    let device = read_size(&mut cursor)?;
    let millimeters = read_size(&mut cursor)?;

    if size < MIN_HEADER_SIZE {
        return Err(ConvertError::format(4, format!("header record size {} is below the minimum", size)));
    }
    if size as usize > data.len() {
        return Err(ConvertError::format(4, format!("header record size {} exceeds buffer", size)));
    }
    if bytes < size {
        return Err(ConvertError::format(48, format!("declared file size {} is smaller than the header", bytes)));
    }
    if (bytes as usize) < data.len() {
        return Err(ConvertError::format(
            48,
            format!("declared file size {} disagrees with buffer length {}", bytes, data.len()),
        ));
    }

    let mut opengl = false;
    let mut micrometers = None;
    if size >= HEADER_SIZE_WITH_MICROMETERS {
        let _cb_pixel_format = cursor.read_u32::<LittleEndian>()?;
        let _off_pixel_format = cursor.read_u32::<LittleEndian>()?;
        opengl = cursor.read_u32::<LittleEndian>()? != 0;
        micrometers = Some(read_size(&mut cursor)?);
    }

    let description = read_description(data, size, description_off, description_len);

    Ok(EmfHeader {
        size,
        bounds,
        frame,
        signature,
        version,
        bytes,
        records,
        handles,
        description,
        pal_entries,
        device,
        millimeters,
        opengl,
        micrometers,
    })
}

/// Description strings live inside the header record; a bad offset is not an error
fn read_description(data: &[u8], header_size: u32, offset: u32, chars: u32) -> Option<String> {
    if chars == 0 || offset == 0 {
        return None;
    }
    let start = offset as usize;
    let end = start.checked_add(chars as usize * 2)?;
    if end > header_size as usize || end > data.len() {
        return None;
    }
    let units: Vec<u16> = data[start..end]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    // Application and picture names are NUL separated
    let text = String::from_utf16_lossy(&units);
    let parts: Vec<&str> = text.split('\0').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" / "))
    }
}

fn read_rect(cursor: &mut Cursor<&[u8]>) -> std::io::Result<RectL> {
    Ok(RectL {
        left: cursor.read_i32::<LittleEndian>()?,
        top: cursor.read_i32::<LittleEndian>()?,
        right: cursor.read_i32::<LittleEndian>()?,
        bottom: cursor.read_i32::<LittleEndian>()?,
    })
}

fn read_size(cursor: &mut Cursor<&[u8]>) -> std::io::Result<SizeL> {
    Ok(SizeL {
        cx: cursor.read_i32::<LittleEndian>()?,
        cy: cursor.read_i32::<LittleEndian>()?,
    })
}

/// One decoded record and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    /// Byte offset of the record inside the EMF buffer
    pub offset: usize,
    pub record_type: u32,
    pub record: Record,
}

/// Lazy iterator over the records following the header.
///
/// Yields `Err(RecordError::Malformed)` for records that are framed correctly
/// but fail to decode and keeps going. `Truncated` and `Cancelled` end the
/// stream.
pub struct RecordReader<'a> {
    data: &'a [u8],
    header: EmfHeader,
    position: usize,
    finished: bool,
    cancellation: Option<CancellationToken>,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> ConvertResult<Self> {
        let header = parse_header(data)?;
        Ok(Self {
            data,
            position: header.size as usize,
            header,
            finished: false,
            cancellation: None,
        })
    }

    /// Check `token` before every record
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn header(&self) -> &EmfHeader {
        &self.header
    }

    /// Byte offset of the next record
    pub fn position(&self) -> usize {
        self.position
    }

    fn stop(&mut self, err: RecordError) -> Option<Result<RecordEntry, RecordError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RecordEntry, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let offset = self.position;

        if let Some(token) = &self.cancellation {
            if token.is_cancelled() {
                return self.stop(RecordError::Cancelled { offset });
            }
        }

        let remaining = self.data.len() - offset.min(self.data.len());
        if remaining < 8 {
            return self.stop(RecordError::Truncated { offset });
        }
        let prefix = &self.data[offset..offset + 8];
        let record_type = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let size = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        if size < 8 || size % 4 != 0 || size > remaining {
            log::debug!(
                "record {} at byte {} has unusable size {} ({} bytes left)",
                get_record_type_name(record_type),
                offset,
                size,
                remaining
            );
            return self.stop(RecordError::Truncated { offset });
        }

        self.position = offset + size;
        let bytes = &self.data[offset..offset + size];

        if record_type == EMR_EOF {
            self.finished = true;
        }

        match decode_record(record_type, bytes) {
            Ok(record) => Some(Ok(RecordEntry {
                offset,
                record_type,
                record,
            })),
            Err(err) => {
                log::warn!(
                    "Failed to decode {} at byte {}: {}",
                    get_record_type_name(record_type),
                    offset,
                    err
                );
                Some(Err(RecordError::Malformed {
                    offset,
                    record_type,
                    reason: err.to_string(),
                }))
            }
        }
    }
}

/// Fully decoded metafile
#[derive(Debug, Clone)]
pub struct EmfDocument {
    pub header: EmfHeader,
    pub records: Vec<RecordEntry>,
    /// Records that were framed but could not be decoded
    pub malformed: Vec<RecordError>,
    /// The buffer ended before the EOF record
    pub truncated: bool,
}

impl EmfDocument {
    pub fn parse(data: &[u8]) -> ConvertResult<Self> {
        let mut reader = RecordReader::new(data)?;
        let header = reader.header().clone();
        let mut records = Vec::new();
        let mut malformed = Vec::new();
        let mut truncated = false;

        for item in &mut reader {
            match item {
                Ok(entry) => records.push(entry),
                Err(RecordError::Truncated { .. }) => truncated = true,
                Err(RecordError::Cancelled { .. }) => return Err(ConvertError::Cancelled),
                Err(err) => malformed.push(err),
            }
        }

        Ok(Self {
            header,
            records,
            malformed,
            truncated,
        })
    }
}

#[derive(Error, Debug)]
enum DecodeError {
    #[error("payload ends before all fields were read")]
    Eof,
    #[error("{0}")]
    Invalid(String),
}

impl From<std::io::Error> for DecodeError {
    fn from(_: std::io::Error) -> Self {
        DecodeError::Eof
    }
}

type DecodeResult<T> = Result<T, DecodeError>;

/// Cursor over one whole record (prefix included, so record-relative offsets
/// can be used directly)
struct RecordCursor<'a> {
    bytes: &'a [u8],
    cursor: Cursor<&'a [u8]>,
    /// Furthest byte covered by an offset-addressed payload
    extent: usize,
}

impl<'a> RecordCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(8);
        Self {
            bytes,
            cursor,
            extent: 8,
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor.position() as usize)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.cursor.read_u8()?)
    }

    fn u16(&mut self) -> DecodeResult<u16> {
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    fn i16(&mut self) -> DecodeResult<i16> {
        Ok(self.cursor.read_i16::<LittleEndian>()?)
    }

    fn u32(&mut self) -> DecodeResult<u32> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    fn i32(&mut self) -> DecodeResult<i32> {
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    fn f32(&mut self) -> DecodeResult<f32> {
        Ok(self.cursor.read_f32::<LittleEndian>()?)
    }

    fn color(&mut self) -> DecodeResult<ColorRef> {
        Ok(ColorRef(self.u32()?))
    }

    fn point(&mut self) -> DecodeResult<PointL> {
        Ok(PointL::new(self.i32()?, self.i32()?))
    }

    fn point16(&mut self) -> DecodeResult<PointL> {
        Ok(PointL::new(self.i16()? as i32, self.i16()? as i32))
    }

    fn size(&mut self) -> DecodeResult<SizeL> {
        Ok(SizeL::new(self.i32()?, self.i32()?))
    }

    fn rect(&mut self) -> DecodeResult<RectL> {
        Ok(RectL::new(self.i32()?, self.i32()?, self.i32()?, self.i32()?))
    }

    fn xform(&mut self) -> DecodeResult<XForm> {
        let m11 = self.f32()? as f64;
        let m12 = self.f32()? as f64;
        let m21 = self.f32()? as f64;
        let m22 = self.f32()? as f64;
        let dx = self.f32()? as f64;
        let dy = self.f32()? as f64;
        Ok(XForm::new(m11, m12, m21, m22, dx, dy))
    }

    fn skip(&mut self, n: usize) -> DecodeResult<()> {
        if self.remaining() < n {
            return Err(DecodeError::Eof);
        }
        self.cursor.set_position(self.cursor.position() + n as u64);
        Ok(())
    }

    /// Consume everything up to the end of the record
    fn skip_rest(&mut self) {
        self.cursor.set_position(self.bytes.len() as u64);
    }

    /// Reject element counts that cannot fit in what is left of the record
    fn ensure(&self, count: u32, element_size: usize) -> DecodeResult<usize> {
        let count = count as usize;
        match count.checked_mul(element_size) {
            Some(total) if total <= self.remaining() => Ok(count),
            _ => Err(DecodeError::Invalid(format!(
                "{} elements of {} bytes do not fit in {} remaining bytes",
                count,
                element_size,
                self.remaining()
            ))),
        }
    }

    fn points(&mut self, count: u32, small: bool) -> DecodeResult<Vec<PointL>> {
        let count = self.ensure(count, if small { 4 } else { 8 })?;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(if small { self.point16()? } else { self.point()? });
        }
        Ok(points)
    }

    /// Record-relative slice addressed by an (offset, length) pair
    fn slice_at(&mut self, offset: u32, len: u32) -> DecodeResult<&'a [u8]> {
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|&end| start >= 8 && end <= self.bytes.len())
            .ok_or_else(|| {
                DecodeError::Invalid(format!(
                    "payload at {}+{} lies outside the {} byte record",
                    offset,
                    len,
                    self.bytes.len()
                ))
            })?;
        self.extent = self.extent.max(end);
        Ok(&self.bytes[start..end])
    }

    fn dib(&mut self, usage: u32, off_bmi: u32, cb_bmi: u32, off_bits: u32, cb_bits: u32) -> DecodeResult<Option<DibData>> {
        if cb_bmi == 0 {
            return Ok(None);
        }
        let bmi = self.slice_at(off_bmi, cb_bmi)?.to_vec();
        let bits = if cb_bits == 0 {
            Vec::new()
        } else {
            self.slice_at(off_bits, cb_bits)?.to_vec()
        };
        Ok(Some(DibData { usage, bmi, bits }))
    }

    fn region(&mut self, size: u32) -> DecodeResult<Option<RegionData>> {
        if size == 0 {
            return Ok(None);
        }
        if (size as usize) < 32 || size as usize > self.remaining() {
            return Err(DecodeError::Invalid(format!("region data size {} is invalid", size)));
        }
        let _header_size = self.u32()?;
        let _region_type = self.u32()?;
        let count = self.u32()?;
        let _rgn_size = self.u32()?;
        let bounds = self.rect()?;
        let count = self.ensure(count, 16)?;
        if 32 + count * 16 > size as usize {
            return Err(DecodeError::Invalid(format!("{} rectangles exceed region data size {}", count, size)));
        }
        let mut rects = Vec::with_capacity(count);
        for _ in 0..count {
            rects.push(self.rect()?);
        }
        // Writers may pad the rectangle list up to RgnDataSize
        self.skip(size as usize - 32 - count * 16)?;
        Ok(Some(RegionData { bounds, rects }))
    }

    fn required_region(&mut self, size: u32) -> DecodeResult<RegionData> {
        self.region(size)?
            .ok_or_else(|| DecodeError::Invalid("record requires region data".to_string()))
    }

    /// Check that the declared size matches what was consumed, allowing
    /// alignment padding
    fn finish(self) -> DecodeResult<()> {
        let consumed = (self.cursor.position() as usize).max(self.extent);
        let len = self.bytes.len();
        if len > consumed && len - consumed >= 4 {
            return Err(DecodeError::Invalid(format!(
                "declared size {} but only {} bytes decoded",
                len, consumed
            )));
        }
        Ok(())
    }
}

/// Records that change nothing a raster output can show
fn is_benign(record_type: u32) -> bool {
    matches!(
        record_type,
        EMR_SETICMMODE
            | EMR_SETMAPPERFLAGS
            | EMR_SETLAYOUT
            | EMR_SETCOLORADJUSTMENT
            | EMR_COLORCORRECTPALETTE
            | EMR_SETICMPROFILEA
            | EMR_SETICMPROFILEW
            | EMR_CREATECOLORSPACE
            | EMR_CREATECOLORSPACEW
            | EMR_SETCOLORSPACE
            | EMR_DELETECOLORSPACE
            | EMR_COLORMATCHTOTARGETW
            | EMR_SETLINKEDUFIS
            | EMR_SETTEXTJUSTIFICATION
            | EMR_FORCEUFIMAPPING
            | EMR_PIXELFORMAT
    )
}

/// Decode one framed record. `bytes` holds the whole record, prefix included.
fn decode_record(record_type: u32, bytes: &[u8]) -> DecodeResult<Record> {
    if record_type == EMR_EOF {
        return Ok(Record::Eof);
    }
    if is_benign(record_type) {
        return Ok(Record::NoOp(record_type));
    }

    let mut c = RecordCursor::new(bytes);
    let record = match record_type {
        EMR_SETWINDOWEXTEX => Record::SetWindowExtEx(c.size()?),
        EMR_SETWINDOWORGEX => Record::SetWindowOrgEx(c.point()?),
        EMR_SETVIEWPORTEXTEX => Record::SetViewportExtEx(c.size()?),
        EMR_SETVIEWPORTORGEX => Record::SetViewportOrgEx(c.point()?),
        EMR_SCALEVIEWPORTEXTEX | EMR_SCALEWINDOWEXTEX => {
            let x_num = c.i32()?;
            let x_denom = c.i32()?;
            let y_num = c.i32()?;
            let y_denom = c.i32()?;
            if record_type == EMR_SCALEVIEWPORTEXTEX {
                Record::ScaleViewportExtEx { x_num, x_denom, y_num, y_denom }
            } else {
                Record::ScaleWindowExtEx { x_num, x_denom, y_num, y_denom }
            }
        }
        EMR_SETMAPMODE => Record::SetMapMode(c.u32()?),
        EMR_SETWORLDTRANSFORM => Record::SetWorldTransform(c.xform()?),
        EMR_MODIFYWORLDTRANSFORM => {
            let xform = c.xform()?;
            Record::ModifyWorldTransform { xform, mode: c.u32()? }
        }
        EMR_SETBKMODE => Record::SetBkMode(c.u32()?),
        EMR_SETPOLYFILLMODE => Record::SetPolyFillMode(c.u32()?),
        EMR_SETROP2 => Record::SetRop2(c.u32()?),
        EMR_SETSTRETCHBLTMODE => Record::SetStretchBltMode(c.u32()?),
        EMR_SETTEXTALIGN => Record::SetTextAlign(c.u32()?),
        EMR_SETTEXTCOLOR => Record::SetTextColor(c.color()?),
        EMR_SETBKCOLOR => Record::SetBkColor(c.color()?),
        EMR_SETBRUSHORGEX => Record::SetBrushOrgEx(c.point()?),
        EMR_SETARCDIRECTION => Record::SetArcDirection(c.u32()?),
        EMR_SETMITERLIMIT => Record::SetMiterLimit(decode_miter_limit(c.u32()?)),
        EMR_MOVETOEX => Record::MoveToEx(c.point()?),
        EMR_SAVEDC => Record::SaveDc,
        EMR_RESTOREDC => Record::RestoreDc(c.i32()?),

        EMR_SELECTOBJECT => Record::SelectObject(c.u32()?),
        EMR_DELETEOBJECT => Record::DeleteObject(c.u32()?),
        EMR_CREATEPEN => {
            let handle = c.u32()?;
            let style = c.u32()?;
            let width = c.point()?.x;
            let color = c.color()?;
            Record::CreatePen { handle, pen: LogPen { style, width, color } }
        }
        EMR_EXTCREATEPEN => decode_ext_create_pen(&mut c)?,
        EMR_CREATEBRUSHINDIRECT => {
            let handle = c.u32()?;
            let style = c.u32()?;
            let color = c.color()?;
            let hatch = c.u32()?;
            Record::CreateBrushIndirect { handle, brush: LogBrush { style, color, hatch } }
        }
        EMR_CREATEMONOBRUSH | EMR_CREATEDIBPATTERNBRUSHPT => {
            let handle = c.u32()?;
            let usage = c.u32()?;
            let off_bmi = c.u32()?;
            let cb_bmi = c.u32()?;
            let off_bits = c.u32()?;
            let cb_bits = c.u32()?;
            let pattern = c
                .dib(usage, off_bmi, cb_bmi, off_bits, cb_bits)?
                .ok_or_else(|| DecodeError::Invalid("pattern brush without bitmap".to_string()))?;
            if record_type == EMR_CREATEMONOBRUSH {
                Record::CreateMonoBrush { handle, pattern }
            } else {
                Record::CreateDibPatternBrushPt { handle, pattern }
            }
        }
        EMR_EXTCREATEFONTINDIRECTW => decode_font(&mut c)?,
        EMR_CREATEPALETTE => {
            let handle = c.u32()?;
            let _version = c.u16()?;
            let count = c.u16()? as u32;
            Record::CreatePalette { handle, entries: decode_palette_entries(&mut c, count)? }
        }
        EMR_SELECTPALETTE => Record::SelectPalette(c.u32()?),
        EMR_SETPALETTEENTRIES => {
            let handle = c.u32()?;
            let start = c.u32()?;
            let count = c.u32()?;
            Record::SetPaletteEntries { handle, start, entries: decode_palette_entries(&mut c, count)? }
        }
        EMR_RESIZEPALETTE => Record::ResizePalette { handle: c.u32()?, entries: c.u32()? },
        EMR_REALIZEPALETTE => Record::RealizePalette,

        EMR_OFFSETCLIPRGN => Record::OffsetClipRgn(c.point()?),
        EMR_EXCLUDECLIPRECT => Record::ExcludeClipRect(c.rect()?),
        EMR_INTERSECTCLIPRECT => Record::IntersectClipRect(c.rect()?),
        EMR_EXTSELECTCLIPRGN => {
            let size = c.u32()?;
            let mode = c.u32()?;
            Record::ExtSelectClipRgn { mode, region: c.region(size)? }
        }
        EMR_SELECTCLIPPATH => Record::SelectClipPath(c.u32()?),
        EMR_SETMETARGN => Record::SetMetaRgn,

        EMR_RECTANGLE => Record::Rectangle(c.rect()?),
        EMR_ELLIPSE => Record::Ellipse(c.rect()?),
        EMR_ROUNDRECT => Record::RoundRect { rect: c.rect()?, corner: c.size()? },
        EMR_ARC | EMR_ARCTO | EMR_CHORD | EMR_PIE => {
            let rect = c.rect()?;
            let start = c.point()?;
            let end = c.point()?;
            match record_type {
                EMR_ARC => Record::Arc { rect, start, end },
                EMR_ARCTO => Record::ArcTo { rect, start, end },
                EMR_CHORD => Record::Chord { rect, start, end },
                _ => Record::Pie { rect, start, end },
            }
        }
        EMR_ANGLEARC => {
            let center = c.point()?;
            let radius = c.u32()?;
            let start_angle = c.f32()?;
            let sweep_angle = c.f32()?;
            if !start_angle.is_finite() || !sweep_angle.is_finite() {
                return Err(DecodeError::Invalid(format!(
                    "angle arc angles {} and {} are not finite",
                    start_angle, sweep_angle
                )));
            }
            Record::AngleArc {
                center,
                radius,
                start_angle,
                sweep_angle,
            }
        }
        EMR_LINETO => Record::LineTo(c.point()?),
        EMR_SETPIXELV => Record::SetPixelV { point: c.point()?, color: c.color()? },

        EMR_POLYLINE | EMR_POLYGON | EMR_POLYBEZIER | EMR_POLYLINETO | EMR_POLYBEZIERTO
        | EMR_POLYLINE16 | EMR_POLYGON16 | EMR_POLYBEZIER16 | EMR_POLYLINETO16 | EMR_POLYBEZIERTO16 => {
            let kind = match record_type {
                EMR_POLYLINE | EMR_POLYLINE16 => PolyKind::Polyline,
                EMR_POLYGON | EMR_POLYGON16 => PolyKind::Polygon,
                EMR_POLYBEZIER | EMR_POLYBEZIER16 => PolyKind::PolyBezier,
                EMR_POLYLINETO | EMR_POLYLINETO16 => PolyKind::PolylineTo,
                _ => PolyKind::PolyBezierTo,
            };
            let small = record_type >= EMR_POLYBEZIER16;
            let bounds = c.rect()?;
            let count = c.u32()?;
            let points = c.points(count, small)?;
            if matches!(kind, PolyKind::PolyBezier) && !points.is_empty() && (points.len() - 1) % 3 != 0 {
                return Err(DecodeError::Invalid(format!("{} points do not form cubic segments", points.len())));
            }
            if matches!(kind, PolyKind::PolyBezierTo) && points.len() % 3 != 0 {
                return Err(DecodeError::Invalid(format!("{} points do not form cubic segments", points.len())));
            }
            Record::Poly { kind, bounds, points }
        }
        EMR_POLYPOLYLINE | EMR_POLYPOLYGON | EMR_POLYPOLYLINE16 | EMR_POLYPOLYGON16 => {
            let closed = matches!(record_type, EMR_POLYPOLYGON | EMR_POLYPOLYGON16);
            let small = matches!(record_type, EMR_POLYPOLYLINE16 | EMR_POLYPOLYGON16);
            let bounds = c.rect()?;
            let poly_count = c.u32()?;
            let total = c.u32()?;
            let poly_count = c.ensure(poly_count, 4)?;
            let mut counts = Vec::with_capacity(poly_count);
            for _ in 0..poly_count {
                counts.push(c.u32()?);
            }
            let sum: u64 = counts.iter().map(|&n| n as u64).sum();
            if sum != total as u64 {
                return Err(DecodeError::Invalid(format!("polygon sizes sum to {} but count is {}", sum, total)));
            }
            let mut polys = Vec::with_capacity(poly_count);
            for n in counts {
                polys.push(c.points(n, small)?);
            }
            Record::PolyPoly { closed, bounds, polys }
        }
        EMR_POLYDRAW | EMR_POLYDRAW16 => {
            let bounds = c.rect()?;
            let count = c.u32()?;
            let points = c.points(count, record_type == EMR_POLYDRAW16)?;
            let n = c.ensure(count, 1)?;
            let mut types = Vec::with_capacity(n);
            for _ in 0..n {
                types.push(c.u8()?);
            }
            Record::PolyDraw { bounds, points, types }
        }

        EMR_BEGINPATH => Record::BeginPath,
        EMR_ENDPATH => Record::EndPath,
        EMR_CLOSEFIGURE => Record::CloseFigure,
        EMR_FILLPATH => Record::FillPath(c.rect()?),
        EMR_STROKEPATH => Record::StrokePath(c.rect()?),
        EMR_STROKEANDFILLPATH => Record::StrokeAndFillPath(c.rect()?),
        EMR_FLATTENPATH => Record::FlattenPath,
        EMR_WIDENPATH => Record::WidenPath,
        EMR_ABORTPATH => Record::AbortPath,

        EMR_FILLRGN => {
            let bounds = c.rect()?;
            let size = c.u32()?;
            let brush = c.u32()?;
            Record::FillRgn { bounds, brush, region: c.required_region(size)? }
        }
        EMR_FRAMERGN => {
            let bounds = c.rect()?;
            let size = c.u32()?;
            let brush = c.u32()?;
            let width = c.size()?;
            Record::FrameRgn { bounds, brush, width, region: c.required_region(size)? }
        }
        EMR_PAINTRGN | EMR_INVERTRGN => {
            let bounds = c.rect()?;
            let size = c.u32()?;
            let region = c.required_region(size)?;
            if record_type == EMR_PAINTRGN {
                Record::PaintRgn { bounds, region }
            } else {
                Record::InvertRgn { bounds, region }
            }
        }

        EMR_BITBLT | EMR_STRETCHBLT | EMR_ALPHABLEND => {
            let blit = decode_blt(&mut c, record_type != EMR_BITBLT)?;
            match record_type {
                EMR_BITBLT => Record::BitBlt(blit),
                EMR_STRETCHBLT => Record::StretchBlt(blit),
                _ => Record::AlphaBlend(blit),
            }
        }
        EMR_STRETCHDIBITS => Record::StretchDibits(decode_dibits(&mut c, true)?),
        EMR_SETDIBITSTODEVICE => Record::SetDibitsToDevice(decode_dibits(&mut c, false)?),

        EMR_EXTTEXTOUTW | EMR_EXTTEXTOUTA => {
            let wide = record_type == EMR_EXTTEXTOUTW;
            let bounds = c.rect()?;
            let graphics_mode = c.u32()?;
            let _ex_scale = c.f32()?;
            let _ey_scale = c.f32()?;
            let text = decode_emr_text(&mut c, wide)?;
            Record::ExtTextOut { bounds, graphics_mode, text }
        }
        EMR_POLYTEXTOUTW | EMR_POLYTEXTOUTA => {
            let wide = record_type == EMR_POLYTEXTOUTW;
            let bounds = c.rect()?;
            let graphics_mode = c.u32()?;
            let _ex_scale = c.f32()?;
            let _ey_scale = c.f32()?;
            let count = c.u32()?;
            let count = c.ensure(count, 36)?;
            let mut texts = Vec::with_capacity(count);
            for _ in 0..count {
                texts.push(decode_emr_text(&mut c, wide)?);
            }
            Record::PolyTextOut { bounds, graphics_mode, texts }
        }

        EMR_GDICOMMENT => {
            let len = c.u32()?;
            let len = c.ensure(len, 1)?;
            let start = c.cursor.position() as usize;
            let data = bytes[start..start + len].to_vec();
            c.skip(len)?;
            Record::Comment(data)
        }

        _ => {
            log::debug!(
                "Unsupported record {} ({} bytes)",
                emf_records::get_record_type_name(record_type),
                bytes.len()
            );
            return Ok(Record::Unsupported {
                record_type,
                raw: bytes[8..].to_vec(),
            });
        }
    };

    c.finish()?;
    Ok(record)
}

/// The limit is stored as an integer by GDI and as a float by some writers
fn decode_miter_limit(raw: u32) -> f64 {
    if raw > 0x00FF_FFFF {
        f32::from_bits(raw) as f64
    } else {
        raw as f64
    }
}

fn decode_palette_entries(c: &mut RecordCursor<'_>, count: u32) -> DecodeResult<Vec<ColorRef>> {
    let count = c.ensure(count, 4)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let r = c.u8()?;
        let g = c.u8()?;
        let b = c.u8()?;
        let _flags = c.u8()?;
        entries.push(ColorRef::rgb(r, g, b));
    }
    Ok(entries)
}

fn decode_ext_create_pen(c: &mut RecordCursor<'_>) -> DecodeResult<Record> {
    let handle = c.u32()?;
    let off_bmi = c.u32()?;
    let cb_bmi = c.u32()?;
    let off_bits = c.u32()?;
    let cb_bits = c.u32()?;
    let style = c.u32()?;
    let width = c.u32()?;
    let brush_style = c.u32()?;
    let color = c.color()?;
    let hatch = c.u32()?;
    let entries = c.u32()?;
    let entries = c.ensure(entries, 4)?;
    let mut style_entries = Vec::with_capacity(entries);
    for _ in 0..entries {
        style_entries.push(c.u32()?);
    }
    // For DIB pattern pens the hatch field carries the color usage
    let pattern = c.dib(hatch, off_bmi, cb_bmi, off_bits, cb_bits)?;
    Ok(Record::ExtCreatePen {
        handle,
        pen: ExtLogPen {
            style,
            width,
            brush_style,
            color,
            hatch,
            style_entries,
            pattern,
        },
    })
}

fn decode_font(c: &mut RecordCursor<'_>) -> DecodeResult<Record> {
    let handle = c.u32()?;
    let height = c.i32()?;
    let width = c.i32()?;
    let escapement = c.i32()?;
    let orientation = c.i32()?;
    let weight = c.i32()?;
    let italic = c.u8()? != 0;
    let underline = c.u8()? != 0;
    let strike_out = c.u8()? != 0;
    let charset = c.u8()?;
    let _out_precision = c.u8()?;
    let _clip_precision = c.u8()?;
    let _quality = c.u8()?;
    let _pitch_and_family = c.u8()?;
    let mut face = Vec::with_capacity(32);
    for _ in 0..32 {
        face.push(c.u16()?);
    }
    let end = face.iter().position(|&ch| ch == 0).unwrap_or(face.len());
    let face_name = String::from_utf16_lossy(&face[..end]).trim().to_string();
    // LOGFONTEXW / LOGFONTEXDV tails carry full names and design vectors
    c.skip_rest();
    Ok(Record::ExtCreateFontIndirectW {
        handle,
        font: LogFont {
            height,
            width,
            escapement,
            orientation,
            weight,
            italic,
            underline,
            strike_out,
            charset,
            face_name,
        },
    })
}

/// BitBlt, StretchBlt and AlphaBlend share one layout; the stretched forms
/// append the source extent
fn decode_blt(c: &mut RecordCursor<'_>, stretched: bool) -> DecodeResult<Blit> {
    let bounds = c.rect()?;
    let dest = c.point()?;
    let dest_size = c.size()?;
    let rop = c.u32()?;
    let src = c.point()?;
    let xform_src = c.xform()?;
    let bk_color_src = c.color()?;
    let usage = c.u32()?;
    let off_bmi = c.u32()?;
    let cb_bmi = c.u32()?;
    let off_bits = c.u32()?;
    let cb_bits = c.u32()?;
    let src_size = if stretched { c.size()? } else { dest_size };
    let source = c.dib(usage, off_bmi, cb_bmi, off_bits, cb_bits)?;
    Ok(Blit {
        bounds,
        dest,
        dest_size,
        src,
        src_size,
        rop,
        xform_src,
        bk_color_src,
        source,
    })
}

/// StretchDIBits and SetDIBitsToDevice
fn decode_dibits(c: &mut RecordCursor<'_>, stretched: bool) -> DecodeResult<Blit> {
    let bounds = c.rect()?;
    let dest = c.point()?;
    let src = c.point()?;
    let src_size = c.size()?;
    let off_bmi = c.u32()?;
    let cb_bmi = c.u32()?;
    let off_bits = c.u32()?;
    let cb_bits = c.u32()?;
    let usage = c.u32()?;
    let (rop, dest_size) = if stretched {
        let rop = c.u32()?;
        (rop, c.size()?)
    } else {
        let _start_scan = c.u32()?;
        let _scans = c.u32()?;
        (SRCCOPY, src_size)
    };
    let source = c.dib(usage, off_bmi, cb_bmi, off_bits, cb_bits)?;
    Ok(Blit {
        bounds,
        dest,
        dest_size,
        src,
        src_size,
        rop,
        xform_src: XForm::identity(),
        bk_color_src: ColorRef::WHITE,
        source,
    })
}

fn decode_emr_text(c: &mut RecordCursor<'_>, wide: bool) -> DecodeResult<EmrText> {
    let reference = c.point()?;
    let chars = c.u32()?;
    let off_string = c.u32()?;
    let options = c.u32()?;
    let rect = if options & ETO_NO_RECT == 0 {
        Some(c.rect()?)
    } else {
        None
    };
    let off_dx = c.u32()?;

    let text = if chars == 0 {
        String::new()
    } else if wide {
        let raw = c.slice_at(off_string, chars.saturating_mul(2))?;
        let units: Vec<u16> = raw.chunks_exact(2).map(|u| u16::from_le_bytes([u[0], u[1]])).collect();
        String::from_utf16_lossy(&units)
    } else {
        // Single byte strings are taken as Latin-1
        c.slice_at(off_string, chars)?.iter().map(|&b| b as char).collect()
    };

    let mut dx = Vec::new();
    if off_dx != 0 && chars != 0 {
        let per_char = if options & ETO_PDY != 0 { 2 } else { 1 };
        let raw = c.slice_at(off_dx, chars.saturating_mul(4 * per_char))?;
        dx = raw
            .chunks_exact(4)
            .step_by(per_char as usize)
            .map(|v| i32::from_le_bytes([v[0], v[1], v[2], v[3]]))
            .collect();
    }

    Ok(EmrText {
        reference,
        options,
        rect,
        text,
        dx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(bytes_total: u32, records: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [EMR_HEADER, 88u32] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in [0i32, 0, 99, 99, 0, 0, 2646, 2646] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for v in [ENHMETA_SIGNATURE, 0x10000, bytes_total, records] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        for v in [0u32, 0, 0, 1920, 1080, 508, 286] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(out.len(), 88);
        out
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

    fn emf(body: &[Vec<u8>]) -> Vec<u8> {
        let len: usize = 88 + body.iter().map(|r| r.len()).sum::<usize>();
        let mut out = header(len as u32, body.len() as u32 + 1);
        for r in body {
            out.extend_from_slice(r);
        }
        out
    }

    #[test]
    fn test_header_fields() {
        let data = emf(&[record(EMR_EOF, &[0, 16, 20])]);
        let header = parse_header(&data).unwrap();
        assert_eq!(header.frame, RectL::new(0, 0, 2646, 2646));
        assert_eq!(header.device, SizeL::new(1920, 1080));
        assert_eq!(header.millimeters, SizeL::new(508, 286));
        assert!(header.micrometers.is_none());
        assert!(is_emf_format(&data));
    }

    #[test]
    fn test_bad_signature() {
        let mut data = emf(&[record(EMR_EOF, &[0, 16, 20])]);
        data[40] = b'X';
        match parse_header(&data) {
            Err(ConvertError::Format { offset, .. }) => assert_eq!(offset, 40),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_buffer() {
        assert!(matches!(parse_header(&[1, 0, 0, 0]), Err(ConvertError::Format { .. })));
    }

    #[test]
    fn test_declared_size_smaller_than_buffer() {
        let mut data = emf(&[record(EMR_EOF, &[0, 16, 20])]);
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(parse_header(&data), Err(ConvertError::Format { .. })));
    }

    #[test]
    fn test_records_decode_in_order() {
        let data = emf(&[
            record(EMR_RECTANGLE, &[0, 0, 10, 10]),
            record(EMR_SETTEXTCOLOR, &[0x0000FF]),
            record(EMR_EOF, &[0, 16, 20]),
        ]);
        let doc = EmfDocument::parse(&data).unwrap();
        assert!(!doc.truncated);
        assert_eq!(doc.records.len(), 3);
        assert_eq!(doc.records[0].record, Record::Rectangle(RectL::new(0, 0, 10, 10)));
        assert_eq!(doc.records[0].offset, 88);
        assert_eq!(doc.records[1].record, Record::SetTextColor(ColorRef(0xFF)));
        assert_eq!(doc.records[2].record, Record::Eof);
    }

    #[test]
    fn test_unknown_record_is_unsupported() {
        let data = emf(&[record(200, &[1, 2]), record(EMR_EOF, &[0, 16, 20])]);
        let doc = EmfDocument::parse(&data).unwrap();
        assert!(matches!(
            doc.records[0].record,
            Record::Unsupported { record_type: 200, ref raw } if raw.len() == 8
        ));
    }

    #[test]
    fn test_missing_eof_is_truncated() {
        let data = emf(&[record(EMR_RECTANGLE, &[0, 0, 10, 10])]);
        let doc = EmfDocument::parse(&data).unwrap();
        assert!(doc.truncated);
        assert_eq!(doc.records.len(), 1);
    }

    #[test]
    fn test_oversized_record_is_truncated() {
        let mut data = emf(&[record(EMR_RECTANGLE, &[0, 0, 10, 10])]);
        // Claim 64 bytes for a 24 byte record
        data[92..96].copy_from_slice(&64u32.to_le_bytes());
        let mut reader = RecordReader::new(&data).unwrap();
        assert_eq!(reader.next(), Some(Err(RecordError::Truncated { offset: 88 })));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_size_mismatch_is_malformed_and_reader_continues() {
        let data = emf(&[
            record(EMR_SETTEXTCOLOR, &[0xFF, 0, 0]),
            record(EMR_EOF, &[0, 16, 20]),
        ]);
        let mut reader = RecordReader::new(&data).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(RecordError::Malformed { offset: 88, record_type: EMR_SETTEXTCOLOR, .. }))
        ));
        assert!(matches!(reader.next(), Some(Ok(RecordEntry { record: Record::Eof, .. }))));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_non_finite_angle_arc_is_malformed() {
        let data = emf(&[
            record(EMR_ANGLEARC, &[10, 10, 5, 0, f32::NAN.to_bits() as i32]),
            record(EMR_EOF, &[0, 16, 20]),
        ]);
        let mut reader = RecordReader::new(&data).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(RecordError::Malformed { offset: 88, record_type: EMR_ANGLEARC, .. }))
        ));
        assert!(matches!(reader.next(), Some(Ok(RecordEntry { record: Record::Eof, .. }))));
    }

    #[test]
    fn test_polyline16_points() {
        let mut payload = vec![0, 0, 20, 20, 2];
        payload.push(0x0005_0003); // (3, 5)
        payload.push(0xFFFF_0014u32 as i32); // (20, -1)
        let data = emf(&[record(EMR_POLYLINE16, &payload), record(EMR_EOF, &[0, 16, 20])]);
        let doc = EmfDocument::parse(&data).unwrap();
        match &doc.records[0].record {
            Record::Poly { kind, points, .. } => {
                assert_eq!(*kind, PolyKind::Polyline);
                assert_eq!(points, &vec![PointL::new(3, 5), PointL::new(20, -1)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_polypolygon_counts_must_agree() {
        let data = emf(&[
            record(EMR_POLYPOLYGON, &[0, 0, 1, 1, 1, 3, 2, 0, 0, 1, 1]),
            record(EMR_EOF, &[0, 16, 20]),
        ]);
        let doc = EmfDocument::parse(&data).unwrap();
        assert_eq!(doc.malformed.len(), 1);
        assert_eq!(doc.records.len(), 1);
    }

    #[test]
    fn test_cancellation_stops_stream() {
        let data = emf(&[record(EMR_RECTANGLE, &[0, 0, 10, 10]), record(EMR_EOF, &[0, 16, 20])]);
        let token = CancellationToken::new();
        token.cancel();
        let mut reader = RecordReader::new(&data).unwrap().with_cancellation(token);
        assert_eq!(reader.next(), Some(Err(RecordError::Cancelled { offset: 88 })));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_miter_limit_float_encoding() {
        assert_eq!(decode_miter_limit(10), 10.0);
        assert_eq!(decode_miter_limit(4.0f32.to_bits()), 4.0);
    }
}

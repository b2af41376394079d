//! GDI objects: pens, brushes, fonts and palettes
//!
//! Objects created by records live in an [`ObjectTable`] keyed by the handle
//! the metafile assigned. The graphics state refers to them through
//! [`ObjectRef`]s, which are weak: a reference whose slot was deleted or
//! reused resolves to the default object of its kind.

use crate::record::{DibData, ExtLogPen, LogBrush, LogFont, LogPen};
use crate::types::ColorRef;
use std::collections::HashMap;

const STOCK_FLAG: u32 = 0x8000_0000;

const PS_STYLE_MASK: u32 = 0x0000_000F;
const PS_ENDCAP_MASK: u32 = 0x0000_0F00;
const PS_JOIN_MASK: u32 = 0x0000_F000;
const PS_GEOMETRIC: u32 = 0x0001_0000;

const BS_SOLID: u32 = 0;
const BS_NULL: u32 = 1;
const BS_HATCHED: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenStyle {
    Solid,
    Dash,
    Dot,
    DashDot,
    DashDotDot,
    Null,
    InsideFrame,
    UserStyle,
    Alternate,
}

impl PenStyle {
    fn from_bits(style: u32) -> Self {
        match style & PS_STYLE_MASK {
            1 => PenStyle::Dash,
            2 => PenStyle::Dot,
            3 => PenStyle::DashDot,
            4 => PenStyle::DashDotDot,
            5 => PenStyle::Null,
            6 => PenStyle::InsideFrame,
            7 => PenStyle::UserStyle,
            8 => PenStyle::Alternate,
            _ => PenStyle::Solid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Round,
    Square,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineJoin {
    Round,
    Bevel,
    Miter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    pub style: PenStyle,
    pub cap: LineCap,
    pub join: LineJoin,
    /// Width in logical units; ignored for cosmetic pens
    pub width: u32,
    /// Cosmetic pens are one reference device pixel wide whatever the mapping
    pub cosmetic: bool,
    pub color: ColorRef,
    /// Dash and gap lengths for `PenStyle::UserStyle`, in logical units
    pub style_entries: Vec<u32>,
}

impl Pen {
    pub fn solid(color: ColorRef) -> Self {
        Self {
            style: PenStyle::Solid,
            cap: LineCap::Round,
            join: LineJoin::Round,
            width: 0,
            cosmetic: true,
            color,
            style_entries: Vec::new(),
        }
    }

    pub fn null() -> Self {
        Self {
            style: PenStyle::Null,
            ..Self::solid(ColorRef::BLACK)
        }
    }

    pub fn from_log_pen(pen: &LogPen) -> Self {
        let width = pen.width.max(0) as u32;
        Self {
            style: PenStyle::from_bits(pen.style),
            cap: cap_from_bits(pen.style),
            join: join_from_bits(pen.style),
            width,
            cosmetic: width == 0,
            color: pen.color,
            style_entries: Vec::new(),
        }
    }

    pub fn from_ext_pen(pen: &ExtLogPen) -> Self {
        let cosmetic = pen.style & PS_GEOMETRIC == 0;
        // Hollow brushes make the pen invisible
        let style = if pen.brush_style == BS_NULL {
            PenStyle::Null
        } else {
            PenStyle::from_bits(pen.style)
        };
        Self {
            style,
            cap: cap_from_bits(pen.style),
            join: join_from_bits(pen.style),
            width: if cosmetic { 0 } else { pen.width },
            cosmetic,
            color: pen.color,
            style_entries: pen.style_entries.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.style == PenStyle::Null
    }
}

fn cap_from_bits(style: u32) -> LineCap {
    match style & PS_ENDCAP_MASK {
        0x0100 => LineCap::Square,
        0x0200 => LineCap::Flat,
        _ => LineCap::Round,
    }
}

fn join_from_bits(style: u32) -> LineJoin {
    match style & PS_JOIN_MASK {
        0x1000 => LineJoin::Bevel,
        0x2000 => LineJoin::Miter,
        _ => LineJoin::Round,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HatchStyle {
    Horizontal,
    Vertical,
    ForwardDiagonal,
    BackwardDiagonal,
    Cross,
    DiagonalCross,
}

impl HatchStyle {
    pub fn from_u32(hatch: u32) -> Self {
        match hatch {
            1 => HatchStyle::Vertical,
            2 => HatchStyle::ForwardDiagonal,
            3 => HatchStyle::BackwardDiagonal,
            4 => HatchStyle::Cross,
            5 => HatchStyle::DiagonalCross,
            _ => HatchStyle::Horizontal,
        }
    }

    /// Whether pixel (x, y) of the 8x8 hatch cell is drawn in the brush color
    pub fn is_set(self, x: u32, y: u32) -> bool {
        let (x, y) = (x % 8, y % 8);
        match self {
            HatchStyle::Horizontal => y == 7,
            HatchStyle::Vertical => x == 7,
            HatchStyle::ForwardDiagonal => x == y,
            HatchStyle::BackwardDiagonal => x + y == 7,
            HatchStyle::Cross => x == 7 || y == 7,
            HatchStyle::DiagonalCross => x == y || x + y == 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Brush {
    Solid(ColorRef),
    Null,
    Hatched { color: ColorRef, hatch: HatchStyle },
    /// Bitmap pattern; monochrome patterns take text and background colors
    Pattern { dib: DibData, monochrome: bool },
}

impl Brush {
    pub fn from_log_brush(brush: &LogBrush) -> Self {
        match brush.style {
            BS_SOLID => Brush::Solid(brush.color),
            BS_NULL => Brush::Null,
            BS_HATCHED => Brush::Hatched {
                color: brush.color,
                hatch: HatchStyle::from_u32(brush.hatch),
            },
            // BS_PATTERN and the DIB pattern styles need bitmap data, which
            // LOGBRUSH cannot carry
            _ => Brush::Solid(brush.color),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Brush::Null)
    }
}

/// Font selection as recorded by the metafile
pub type Font = LogFont;

#[derive(Debug, Clone, PartialEq)]
pub enum GraphicsObject {
    Pen(Pen),
    Brush(Brush),
    Font(Font),
    Palette(Vec<ColorRef>),
}

impl GraphicsObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            GraphicsObject::Pen(_) => ObjectKind::Pen,
            GraphicsObject::Brush(_) => ObjectKind::Brush,
            GraphicsObject::Font(_) => ObjectKind::Font,
            GraphicsObject::Palette(_) => ObjectKind::Palette,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Pen,
    Brush,
    Font,
    Palette,
}

/// Predefined objects addressed by handles with the high bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockObject {
    WhiteBrush,
    LtGrayBrush,
    GrayBrush,
    DkGrayBrush,
    BlackBrush,
    NullBrush,
    WhitePen,
    BlackPen,
    NullPen,
    OemFixedFont,
    AnsiFixedFont,
    AnsiVarFont,
    SystemFont,
    DeviceDefaultFont,
    DefaultPalette,
    SystemFixedFont,
    DefaultGuiFont,
    DcBrush,
    DcPen,
}

impl StockObject {
    pub fn from_handle(handle: u32) -> Option<Self> {
        if handle & STOCK_FLAG == 0 {
            return None;
        }
        Some(match handle & !STOCK_FLAG {
            0 => StockObject::WhiteBrush,
            1 => StockObject::LtGrayBrush,
            2 => StockObject::GrayBrush,
            3 => StockObject::DkGrayBrush,
            4 => StockObject::BlackBrush,
            5 => StockObject::NullBrush,
            6 => StockObject::WhitePen,
            7 => StockObject::BlackPen,
            8 => StockObject::NullPen,
            10 => StockObject::OemFixedFont,
            11 => StockObject::AnsiFixedFont,
            12 => StockObject::AnsiVarFont,
            13 => StockObject::SystemFont,
            14 => StockObject::DeviceDefaultFont,
            15 => StockObject::DefaultPalette,
            16 => StockObject::SystemFixedFont,
            17 => StockObject::DefaultGuiFont,
            18 => StockObject::DcBrush,
            19 => StockObject::DcPen,
            _ => return None,
        })
    }

    pub fn kind(self) -> ObjectKind {
        use StockObject::*;
        match self {
            WhiteBrush | LtGrayBrush | GrayBrush | DkGrayBrush | BlackBrush | NullBrush | DcBrush => {
                ObjectKind::Brush
            }
            WhitePen | BlackPen | NullPen | DcPen => ObjectKind::Pen,
            DefaultPalette => ObjectKind::Palette,
            _ => ObjectKind::Font,
        }
    }

    pub fn object(self) -> GraphicsObject {
        use StockObject::*;
        match self {
            WhiteBrush | DcBrush => GraphicsObject::Brush(Brush::Solid(ColorRef::WHITE)),
            LtGrayBrush => GraphicsObject::Brush(Brush::Solid(ColorRef(0x00C0_C0C0))),
            GrayBrush => GraphicsObject::Brush(Brush::Solid(ColorRef(0x0080_8080))),
            DkGrayBrush => GraphicsObject::Brush(Brush::Solid(ColorRef(0x0040_4040))),
            BlackBrush => GraphicsObject::Brush(Brush::Solid(ColorRef::BLACK)),
            NullBrush => GraphicsObject::Brush(Brush::Null),
            WhitePen => GraphicsObject::Pen(Pen::solid(ColorRef::WHITE)),
            BlackPen | DcPen => GraphicsObject::Pen(Pen::solid(ColorRef::BLACK)),
            NullPen => GraphicsObject::Pen(Pen::null()),
            DefaultPalette => GraphicsObject::Palette(default_palette()),
            OemFixedFont | AnsiFixedFont | SystemFixedFont => GraphicsObject::Font(stock_font("Courier New", 13)),
            AnsiVarFont | DefaultGuiFont => GraphicsObject::Font(stock_font("Arial", 13)),
            SystemFont | DeviceDefaultFont => GraphicsObject::Font(stock_font("Arial", 16)),
        }
    }
}

fn stock_font(face: &str, height: i32) -> Font {
    LogFont {
        height: -height,
        width: 0,
        escapement: 0,
        orientation: 0,
        weight: 400,
        italic: false,
        underline: false,
        strike_out: false,
        charset: 0,
        face_name: face.to_string(),
    }
}

/// The 20 static colors of the system palette
pub fn default_palette() -> Vec<ColorRef> {
    [
        (0x00, 0x00, 0x00),
        (0x80, 0x00, 0x00),
        (0x00, 0x80, 0x00),
        (0x80, 0x80, 0x00),
        (0x00, 0x00, 0x80),
        (0x80, 0x00, 0x80),
        (0x00, 0x80, 0x80),
        (0xC0, 0xC0, 0xC0),
        (0xC0, 0xDC, 0xC0),
        (0xA6, 0xCA, 0xF0),
        (0xFF, 0xFB, 0xF0),
        (0xA0, 0xA0, 0xA4),
        (0x80, 0x80, 0x80),
        (0xFF, 0x00, 0x00),
        (0x00, 0xFF, 0x00),
        (0xFF, 0xFF, 0x00),
        (0x00, 0x00, 0xFF),
        (0xFF, 0x00, 0xFF),
        (0x00, 0xFF, 0xFF),
        (0xFF, 0xFF, 0xFF),
    ]
    .iter()
    .map(|&(r, g, b)| ColorRef::rgb(r, g, b))
    .collect()
}

/// Weak reference to a selected object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Stock(StockObject),
    Table { handle: u32, generation: u64 },
}

/// Why an object table operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// Handle 0 and stock handles cannot be created or deleted
    InvalidHandle(u32),
    UnknownHandle(u32),
}

/// Arena of objects created by the metafile
#[derive(Debug, Default)]
pub struct ObjectTable {
    slots: HashMap<u32, (u64, GraphicsObject)>,
    next_generation: u64,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Store `object` under `handle`, replacing whatever was there
    pub fn create(&mut self, handle: u32, object: GraphicsObject) -> Result<(), ObjectError> {
        if handle == 0 || handle & STOCK_FLAG != 0 {
            return Err(ObjectError::InvalidHandle(handle));
        }
        self.next_generation += 1;
        self.slots.insert(handle, (self.next_generation, object));
        Ok(())
    }

    pub fn delete(&mut self, handle: u32) -> Result<GraphicsObject, ObjectError> {
        if handle == 0 || handle & STOCK_FLAG != 0 {
            return Err(ObjectError::InvalidHandle(handle));
        }
        self.slots
            .remove(&handle)
            .map(|(_, object)| object)
            .ok_or(ObjectError::UnknownHandle(handle))
    }

    /// Reference to the object currently stored under `handle`
    pub fn reference(&self, handle: u32) -> Result<(ObjectRef, ObjectKind), ObjectError> {
        if let Some(stock) = StockObject::from_handle(handle) {
            return Ok((ObjectRef::Stock(stock), stock.kind()));
        }
        match self.slots.get(&handle) {
            Some((generation, object)) => Ok((
                ObjectRef::Table {
                    handle,
                    generation: *generation,
                },
                object.kind(),
            )),
            None => Err(ObjectError::UnknownHandle(handle)),
        }
    }

    /// Object behind a live table reference
    pub fn get(&self, reference: &ObjectRef) -> Option<&GraphicsObject> {
        match reference {
            ObjectRef::Table { handle, generation } => match self.slots.get(handle) {
                Some((g, object)) if g == generation => Some(object),
                _ => None,
            },
            ObjectRef::Stock(_) => None,
        }
    }

    fn resolve(&self, reference: &ObjectRef) -> Option<GraphicsObject> {
        match reference {
            ObjectRef::Stock(stock) => Some(stock.object()),
            table => self.get(table).cloned(),
        }
    }

    pub fn pen(&self, reference: &ObjectRef) -> Pen {
        match self.resolve(reference) {
            Some(GraphicsObject::Pen(pen)) => pen,
            _ => Pen::solid(ColorRef::BLACK),
        }
    }

    pub fn brush(&self, reference: &ObjectRef) -> Brush {
        match self.resolve(reference) {
            Some(GraphicsObject::Brush(brush)) => brush,
            _ => Brush::Solid(ColorRef::WHITE),
        }
    }

    pub fn font(&self, reference: &ObjectRef) -> Font {
        match self.resolve(reference) {
            Some(GraphicsObject::Font(font)) => font,
            _ => stock_font("Arial", 16),
        }
    }

    pub fn palette(&self, reference: &ObjectRef) -> Vec<ColorRef> {
        match self.resolve(reference) {
            Some(GraphicsObject::Palette(entries)) => entries,
            _ => default_palette(),
        }
    }

    /// Mutable access for palette edits
    pub fn palette_mut(&mut self, handle: u32) -> Option<&mut Vec<ColorRef>> {
        match self.slots.get_mut(&handle) {
            Some((_, GraphicsObject::Palette(entries))) => Some(entries),
            _ => None,
        }
    }
}

//! EMF record type codes ([MS-EMF] 2.1.1) and the constants used by their payloads

pub const EMR_HEADER: u32 = 1;
pub const EMR_POLYBEZIER: u32 = 2;
pub const EMR_POLYGON: u32 = 3;
pub const EMR_POLYLINE: u32 = 4;
pub const EMR_POLYBEZIERTO: u32 = 5;
pub const EMR_POLYLINETO: u32 = 6;
pub const EMR_POLYPOLYLINE: u32 = 7;
pub const EMR_POLYPOLYGON: u32 = 8;
pub const EMR_SETWINDOWEXTEX: u32 = 9;
pub const EMR_SETWINDOWORGEX: u32 = 10;
pub const EMR_SETVIEWPORTEXTEX: u32 = 11;
pub const EMR_SETVIEWPORTORGEX: u32 = 12;
pub const EMR_SETBRUSHORGEX: u32 = 13;
pub const EMR_EOF: u32 = 14;
pub const EMR_SETPIXELV: u32 = 15;
pub const EMR_SETMAPPERFLAGS: u32 = 16;
pub const EMR_SETMAPMODE: u32 = 17;
pub const EMR_SETBKMODE: u32 = 18;
pub const EMR_SETPOLYFILLMODE: u32 = 19;
pub const EMR_SETROP2: u32 = 20;
pub const EMR_SETSTRETCHBLTMODE: u32 = 21;
pub const EMR_SETTEXTALIGN: u32 = 22;
pub const EMR_SETCOLORADJUSTMENT: u32 = 23;
pub const EMR_SETTEXTCOLOR: u32 = 24;
pub const EMR_SETBKCOLOR: u32 = 25;
pub const EMR_OFFSETCLIPRGN: u32 = 26;
pub const EMR_MOVETOEX: u32 = 27;
pub const EMR_SETMETARGN: u32 = 28;
pub const EMR_EXCLUDECLIPRECT: u32 = 29;
pub const EMR_INTERSECTCLIPRECT: u32 = 30;
pub const EMR_SCALEVIEWPORTEXTEX: u32 = 31;
pub const EMR_SCALEWINDOWEXTEX: u32 = 32;
pub const EMR_SAVEDC: u32 = 33;
pub const EMR_RESTOREDC: u32 = 34;
pub const EMR_SETWORLDTRANSFORM: u32 = 35;
pub const EMR_MODIFYWORLDTRANSFORM: u32 = 36;
pub const EMR_SELECTOBJECT: u32 = 37;
pub const EMR_CREATEPEN: u32 = 38;
pub const EMR_CREATEBRUSHINDIRECT: u32 = 39;
pub const EMR_DELETEOBJECT: u32 = 40;
pub const EMR_ANGLEARC: u32 = 41;
pub const EMR_ELLIPSE: u32 = 42;
pub const EMR_RECTANGLE: u32 = 43;
pub const EMR_ROUNDRECT: u32 = 44;
pub const EMR_ARC: u32 = 45;
pub const EMR_CHORD: u32 = 46;
pub const EMR_PIE: u32 = 47;
pub const EMR_SELECTPALETTE: u32 = 48;
pub const EMR_CREATEPALETTE: u32 = 49;
pub const EMR_SETPALETTEENTRIES: u32 = 50;
pub const EMR_RESIZEPALETTE: u32 = 51;
pub const EMR_REALIZEPALETTE: u32 = 52;
pub const EMR_EXTFLOODFILL: u32 = 53;
pub const EMR_LINETO: u32 = 54;
pub const EMR_ARCTO: u32 = 55;
pub const EMR_POLYDRAW: u32 = 56;
pub const EMR_SETARCDIRECTION: u32 = 57;
pub const EMR_SETMITERLIMIT: u32 = 58;
pub const EMR_BEGINPATH: u32 = 59;
pub const EMR_ENDPATH: u32 = 60;
pub const EMR_CLOSEFIGURE: u32 = 61;
pub const EMR_FILLPATH: u32 = 62;
pub const EMR_STROKEANDFILLPATH: u32 = 63;
pub const EMR_STROKEPATH: u32 = 64;
pub const EMR_FLATTENPATH: u32 = 65;
pub const EMR_WIDENPATH: u32 = 66;
pub const EMR_SELECTCLIPPATH: u32 = 67;
pub const EMR_ABORTPATH: u32 = 68;
pub const EMR_GDICOMMENT: u32 = 70;
pub const EMR_FILLRGN: u32 = 71;
pub const EMR_FRAMERGN: u32 = 72;
pub const EMR_INVERTRGN: u32 = 73;
pub const EMR_PAINTRGN: u32 = 74;
pub const EMR_EXTSELECTCLIPRGN: u32 = 75;
pub const EMR_BITBLT: u32 = 76;
pub const EMR_STRETCHBLT: u32 = 77;
pub const EMR_MASKBLT: u32 = 78;
pub const EMR_PLGBLT: u32 = 79;
pub const EMR_SETDIBITSTODEVICE: u32 = 80;
pub const EMR_STRETCHDIBITS: u32 = 81;
pub const EMR_EXTCREATEFONTINDIRECTW: u32 = 82;
pub const EMR_EXTTEXTOUTA: u32 = 83;
pub const EMR_EXTTEXTOUTW: u32 = 84;
pub const EMR_POLYBEZIER16: u32 = 85;
pub const EMR_POLYGON16: u32 = 86;
pub const EMR_POLYLINE16: u32 = 87;
pub const EMR_POLYBEZIERTO16: u32 = 88;
pub const EMR_POLYLINETO16: u32 = 89;
pub const EMR_POLYPOLYLINE16: u32 = 90;
pub const EMR_POLYPOLYGON16: u32 = 91;
pub const EMR_POLYDRAW16: u32 = 92;
pub const EMR_CREATEMONOBRUSH: u32 = 93;
pub const EMR_CREATEDIBPATTERNBRUSHPT: u32 = 94;
pub const EMR_EXTCREATEPEN: u32 = 95;
pub const EMR_POLYTEXTOUTA: u32 = 96;
pub const EMR_POLYTEXTOUTW: u32 = 97;
pub const EMR_SETICMMODE: u32 = 98;
pub const EMR_CREATECOLORSPACE: u32 = 99;
pub const EMR_SETCOLORSPACE: u32 = 100;
pub const EMR_DELETECOLORSPACE: u32 = 101;
pub const EMR_GLSRECORD: u32 = 102;
pub const EMR_GLSBOUNDEDRECORD: u32 = 103;
pub const EMR_PIXELFORMAT: u32 = 104;
pub const EMR_DRAWESCAPE: u32 = 105;
pub const EMR_EXTESCAPE: u32 = 106;
pub const EMR_SMALLTEXTOUT: u32 = 108;
pub const EMR_FORCEUFIMAPPING: u32 = 109;
pub const EMR_NAMEDESCAPE: u32 = 110;
pub const EMR_COLORCORRECTPALETTE: u32 = 111;
pub const EMR_SETICMPROFILEA: u32 = 112;
pub const EMR_SETICMPROFILEW: u32 = 113;
pub const EMR_ALPHABLEND: u32 = 114;
pub const EMR_SETLAYOUT: u32 = 115;
pub const EMR_TRANSPARENTBLT: u32 = 116;
pub const EMR_GRADIENTFILL: u32 = 118;
pub const EMR_SETLINKEDUFIS: u32 = 119;
pub const EMR_SETTEXTJUSTIFICATION: u32 = 120;
pub const EMR_COLORMATCHTOTARGETW: u32 = 121;
pub const EMR_CREATECOLORSPACEW: u32 = 122;

/// " EMF" in the header's dSignature field
pub const ENHMETA_SIGNATURE: u32 = 0x464D_4520;
/// Size of the original (pre-extension) ENHMETAHEADER record
pub const MIN_HEADER_SIZE: u32 = 88;
/// Header size once szlMicrometers is present
pub const HEADER_SIZE_WITH_MICROMETERS: u32 = 108;

// Map modes
pub const MM_TEXT: u32 = 1;
pub const MM_LOMETRIC: u32 = 2;
pub const MM_HIMETRIC: u32 = 3;
pub const MM_LOENGLISH: u32 = 4;
pub const MM_HIENGLISH: u32 = 5;
pub const MM_TWIPS: u32 = 6;
pub const MM_ISOTROPIC: u32 = 7;
pub const MM_ANISOTROPIC: u32 = 8;

// ModifyWorldTransform modes
pub const MWT_IDENTITY: u32 = 1;
pub const MWT_LEFTMULTIPLY: u32 = 2;
pub const MWT_RIGHTMULTIPLY: u32 = 3;
pub const MWT_SET: u32 = 4;

// Region combination modes
pub const RGN_AND: u32 = 1;
pub const RGN_OR: u32 = 2;
pub const RGN_XOR: u32 = 3;
pub const RGN_DIFF: u32 = 4;
pub const RGN_COPY: u32 = 5;

// Polygon fill modes
pub const ALTERNATE: u32 = 1;
pub const WINDING: u32 = 2;

// Background modes
pub const TRANSPARENT: u32 = 1;
pub const OPAQUE: u32 = 2;

// Arc directions
pub const AD_COUNTERCLOCKWISE: u32 = 1;
pub const AD_CLOCKWISE: u32 = 2;

// Text alignment
pub const TA_UPDATECP: u32 = 0x0001;
pub const TA_RIGHT: u32 = 0x0002;
pub const TA_CENTER: u32 = 0x0006;
pub const TA_BOTTOM: u32 = 0x0008;
pub const TA_BASELINE: u32 = 0x0018;

// ExtTextOut options
pub const ETO_OPAQUE: u32 = 0x0002;
pub const ETO_CLIPPED: u32 = 0x0004;
pub const ETO_GLYPH_INDEX: u32 = 0x0010;
pub const ETO_NO_RECT: u32 = 0x0100;
pub const ETO_PDY: u32 = 0x2000;

// Raster operations used by the blit records
pub const SRCCOPY: u32 = 0x00CC_0020;
pub const SRCPAINT: u32 = 0x00EE_0086;
pub const SRCAND: u32 = 0x0088_00C6;
pub const SRCINVERT: u32 = 0x0066_0046;
pub const PATCOPY: u32 = 0x00F0_0021;
pub const PATINVERT: u32 = 0x005A_0049;
pub const DSTINVERT: u32 = 0x0055_0009;
pub const BLACKNESS: u32 = 0x0000_0042;
pub const WHITENESS: u32 = 0x00FF_0062;
pub const NOP_ROP: u32 = 0x00AA_0029;

// AlphaBlend source format flag (high byte of the blend function)
pub const AC_SRC_ALPHA: u32 = 0x01;

// Binary raster operations (SetROP2)
pub const R2_BLACK: u32 = 1;
pub const R2_NOT: u32 = 6;
pub const R2_XORPEN: u32 = 7;
pub const R2_MASKPEN: u32 = 9;
pub const R2_NOP: u32 = 11;
pub const R2_COPYPEN: u32 = 13;
pub const R2_MERGEPEN: u32 = 15;
pub const R2_WHITE: u32 = 16;

// PolyDraw point types
pub const PT_CLOSEFIGURE: u8 = 0x01;
pub const PT_LINETO: u8 = 0x02;
pub const PT_BEZIERTO: u8 = 0x04;
pub const PT_MOVETO: u8 = 0x06;

// DIB color usage
pub const DIB_RGB_COLORS: u32 = 0;
pub const DIB_PAL_COLORS: u32 = 1;

/// Get record type name for logging
pub fn get_record_type_name(record_type: u32) -> &'static str {
    match record_type {
        EMR_HEADER => "EMR_HEADER",
        EMR_POLYBEZIER => "EMR_POLYBEZIER",
        EMR_POLYGON => "EMR_POLYGON",
        EMR_POLYLINE => "EMR_POLYLINE",
        EMR_POLYBEZIERTO => "EMR_POLYBEZIERTO",
        EMR_POLYLINETO => "EMR_POLYLINETO",
        EMR_POLYPOLYLINE => "EMR_POLYPOLYLINE",
        EMR_POLYPOLYGON => "EMR_POLYPOLYGON",
        EMR_SETWINDOWEXTEX => "EMR_SETWINDOWEXTEX",
        EMR_SETWINDOWORGEX => "EMR_SETWINDOWORGEX",
        EMR_SETVIEWPORTEXTEX => "EMR_SETVIEWPORTEXTEX",
        EMR_SETVIEWPORTORGEX => "EMR_SETVIEWPORTORGEX",
        EMR_SETBRUSHORGEX => "EMR_SETBRUSHORGEX",
        EMR_EOF => "EMR_EOF",
        EMR_SETPIXELV => "EMR_SETPIXELV",
        EMR_SETMAPPERFLAGS => "EMR_SETMAPPERFLAGS",
        EMR_SETMAPMODE => "EMR_SETMAPMODE",
        EMR_SETBKMODE => "EMR_SETBKMODE",
        EMR_SETPOLYFILLMODE => "EMR_SETPOLYFILLMODE",
        EMR_SETROP2 => "EMR_SETROP2",
        EMR_SETSTRETCHBLTMODE => "EMR_SETSTRETCHBLTMODE",
        EMR_SETTEXTALIGN => "EMR_SETTEXTALIGN",
        EMR_SETCOLORADJUSTMENT => "EMR_SETCOLORADJUSTMENT",
        EMR_SETTEXTCOLOR => "EMR_SETTEXTCOLOR",
        EMR_SETBKCOLOR => "EMR_SETBKCOLOR",
        EMR_OFFSETCLIPRGN => "EMR_OFFSETCLIPRGN",
        EMR_MOVETOEX => "EMR_MOVETOEX",
        EMR_SETMETARGN => "EMR_SETMETARGN",
        EMR_EXCLUDECLIPRECT => "EMR_EXCLUDECLIPRECT",
        EMR_INTERSECTCLIPRECT => "EMR_INTERSECTCLIPRECT",
        EMR_SCALEVIEWPORTEXTEX => "EMR_SCALEVIEWPORTEXTEX",
        EMR_SCALEWINDOWEXTEX => "EMR_SCALEWINDOWEXTEX",
        EMR_SAVEDC => "EMR_SAVEDC",
        EMR_RESTOREDC => "EMR_RESTOREDC",
        EMR_SETWORLDTRANSFORM => "EMR_SETWORLDTRANSFORM",
        EMR_MODIFYWORLDTRANSFORM => "EMR_MODIFYWORLDTRANSFORM",
        EMR_SELECTOBJECT => "EMR_SELECTOBJECT",
        EMR_CREATEPEN => "EMR_CREATEPEN",
        EMR_CREATEBRUSHINDIRECT => "EMR_CREATEBRUSHINDIRECT",
        EMR_DELETEOBJECT => "EMR_DELETEOBJECT",
        EMR_ANGLEARC => "EMR_ANGLEARC",
        EMR_ELLIPSE => "EMR_ELLIPSE",
        EMR_RECTANGLE => "EMR_RECTANGLE",
        EMR_ROUNDRECT => "EMR_ROUNDRECT",
        EMR_ARC => "EMR_ARC",
        EMR_CHORD => "EMR_CHORD",
        EMR_PIE => "EMR_PIE",
        EMR_SELECTPALETTE => "EMR_SELECTPALETTE",
        EMR_CREATEPALETTE => "EMR_CREATEPALETTE",
        EMR_SETPALETTEENTRIES => "EMR_SETPALETTEENTRIES",
        EMR_RESIZEPALETTE => "EMR_RESIZEPALETTE",
        EMR_REALIZEPALETTE => "EMR_REALIZEPALETTE",
        EMR_EXTFLOODFILL => "EMR_EXTFLOODFILL",
        EMR_LINETO => "EMR_LINETO",
        EMR_ARCTO => "EMR_ARCTO",
        EMR_POLYDRAW => "EMR_POLYDRAW",
        EMR_SETARCDIRECTION => "EMR_SETARCDIRECTION",
        EMR_SETMITERLIMIT => "EMR_SETMITERLIMIT",
        EMR_BEGINPATH => "EMR_BEGINPATH",
        EMR_ENDPATH => "EMR_ENDPATH",
        EMR_CLOSEFIGURE => "EMR_CLOSEFIGURE",
        EMR_FILLPATH => "EMR_FILLPATH",
        EMR_STROKEANDFILLPATH => "EMR_STROKEANDFILLPATH",
        EMR_STROKEPATH => "EMR_STROKEPATH",
        EMR_FLATTENPATH => "EMR_FLATTENPATH",
        EMR_WIDENPATH => "EMR_WIDENPATH",
        EMR_SELECTCLIPPATH => "EMR_SELECTCLIPPATH",
        EMR_ABORTPATH => "EMR_ABORTPATH",
        EMR_GDICOMMENT => "EMR_GDICOMMENT",
        EMR_FILLRGN => "EMR_FILLRGN",
        EMR_FRAMERGN => "EMR_FRAMERGN",
        EMR_INVERTRGN => "EMR_INVERTRGN",
        EMR_PAINTRGN => "EMR_PAINTRGN",
        EMR_EXTSELECTCLIPRGN => "EMR_EXTSELECTCLIPRGN",
        EMR_BITBLT => "EMR_BITBLT",
        EMR_STRETCHBLT => "EMR_STRETCHBLT",
        EMR_MASKBLT => "EMR_MASKBLT",
        EMR_PLGBLT => "EMR_PLGBLT",
        EMR_SETDIBITSTODEVICE => "EMR_SETDIBITSTODEVICE",
        EMR_STRETCHDIBITS => "EMR_STRETCHDIBITS",
        EMR_EXTCREATEFONTINDIRECTW => "EMR_EXTCREATEFONTINDIRECTW",
        EMR_EXTTEXTOUTA => "EMR_EXTTEXTOUTA",
        EMR_EXTTEXTOUTW => "EMR_EXTTEXTOUTW",
        EMR_POLYBEZIER16 => "EMR_POLYBEZIER16",
        EMR_POLYGON16 => "EMR_POLYGON16",
        EMR_POLYLINE16 => "EMR_POLYLINE16",
        EMR_POLYBEZIERTO16 => "EMR_POLYBEZIERTO16",
        EMR_POLYLINETO16 => "EMR_POLYLINETO16",
        EMR_POLYPOLYLINE16 => "EMR_POLYPOLYLINE16",
        EMR_POLYPOLYGON16 => "EMR_POLYPOLYGON16",
        EMR_POLYDRAW16 => "EMR_POLYDRAW16",
        EMR_CREATEMONOBRUSH => "EMR_CREATEMONOBRUSH",
        EMR_CREATEDIBPATTERNBRUSHPT => "EMR_CREATEDIBPATTERNBRUSHPT",
        EMR_EXTCREATEPEN => "EMR_EXTCREATEPEN",
        EMR_POLYTEXTOUTA => "EMR_POLYTEXTOUTA",
        EMR_POLYTEXTOUTW => "EMR_POLYTEXTOUTW",
        EMR_SETICMMODE => "EMR_SETICMMODE",
        EMR_CREATECOLORSPACE => "EMR_CREATECOLORSPACE",
        EMR_SETCOLORSPACE => "EMR_SETCOLORSPACE",
        EMR_DELETECOLORSPACE => "EMR_DELETECOLORSPACE",
        EMR_GLSRECORD => "EMR_GLSRECORD",
        EMR_GLSBOUNDEDRECORD => "EMR_GLSBOUNDEDRECORD",
        EMR_PIXELFORMAT => "EMR_PIXELFORMAT",
        EMR_DRAWESCAPE => "EMR_DRAWESCAPE",
        EMR_EXTESCAPE => "EMR_EXTESCAPE",
        EMR_SMALLTEXTOUT => "EMR_SMALLTEXTOUT",
        EMR_FORCEUFIMAPPING => "EMR_FORCEUFIMAPPING",
        EMR_NAMEDESCAPE => "EMR_NAMEDESCAPE",
        EMR_COLORCORRECTPALETTE => "EMR_COLORCORRECTPALETTE",
        EMR_SETICMPROFILEA => "EMR_SETICMPROFILEA",
        EMR_SETICMPROFILEW => "EMR_SETICMPROFILEW",
        EMR_ALPHABLEND => "EMR_ALPHABLEND",
        EMR_SETLAYOUT => "EMR_SETLAYOUT",
        EMR_TRANSPARENTBLT => "EMR_TRANSPARENTBLT",
        EMR_GRADIENTFILL => "EMR_GRADIENTFILL",
        EMR_SETLINKEDUFIS => "EMR_SETLINKEDUFIS",
        EMR_SETTEXTJUSTIFICATION => "EMR_SETTEXTJUSTIFICATION",
        EMR_COLORMATCHTOTARGETW => "EMR_COLORMATCHTOTARGETW",
        EMR_CREATECOLORSPACEW => "EMR_CREATECOLORSPACEW",
        _ => "EMR_UNKNOWN",
    }
}

mod common;

use common::*;
use emf_png_converter::*;

fn sample() -> Vec<u8> {
    EmfBuilder::new(100, 50).rectangle(0, 0, 100, 50).build()
}

#[test]
fn test_read_emf_bbox() {
    let dims = read_emf_bbox(&sample(), 96).unwrap();
    assert_eq!((dims.width_px, dims.height_px), (100, 50));
    assert_eq!((dims.bounds_width_px, dims.bounds_height_px), (100, 50));
    assert_eq!(dims.frame_width_hmm, 2646);
    assert!((dims.frame_width_mm - 26.46).abs() < 1e-9);
    assert!((dims.frame_width_in - 2646.0 / 2540.0).abs() < 1e-9);
    assert_eq!((dims.device_width_px, dims.device_width_mm), (1920, 508));
    assert_eq!(dims.dpi, 96);

    assert_eq!(get_dimensions(&sample(), 192).unwrap(), (200, 100));
    assert!(matches!(read_emf_bbox(&sample(), 0), Err(ConvertError::Config(_))));
    assert!(matches!(read_emf_bbox(b"not an emf", 96), Err(ConvertError::Format { .. })));
}

#[test]
fn test_bytes_to_png() {
    let png = emf_bytes_to_png_bytes(&sample(), 96).unwrap();
    let image = decode_png(&png);
    assert_eq!(image.dimensions(), (100, 50));
    assert_pixel(&image, 0, 25, BLACK);
    assert_pixel(&image, 50, 25, WHITE);
}

#[test]
fn test_uri_round_trip() {
    let emf = sample();
    let emf_base64 = to_base64(&emf);
    let emf_uri = emf_base64_to_emf_uri(&emf_base64);
    assert!(emf_uri.starts_with("data:image/x-emf;base64,"));
    assert_eq!(emf_uri_to_emf_base64(&emf_uri).unwrap(), emf_base64);

    let png_uri = emf_uri_to_png_uri(&emf_uri, 96).unwrap();
    assert!(png_uri.starts_with("data:image/png;base64,"));
    let png_base64 = png_uri_to_png_base64(&png_uri).unwrap();
    assert_eq!(png_base64, emf_base64_to_png_base64(&emf_base64, 96).unwrap());
    assert_eq!(png_base64_to_png_uri(&png_base64), png_uri);
}

#[test]
fn test_uri_errors() {
    assert!(matches!(
        emf_uri_to_png_uri("data:image/png;base64,AAAA", 96),
        Err(ConvertError::InvalidUri(_))
    ));
    assert!(matches!(
        emf_base64_to_png_base64("%%%", 96),
        Err(ConvertError::Base64(_))
    ));
    assert!(matches!(
        emf_base64_to_png_base64("AAAA", 96),
        Err(ConvertError::Format { .. })
    ));
}

#[test]
fn test_file_helpers() {
    let dir = std::env::temp_dir().join(format!("emf_png_converter_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("sample.emf");
    let output = dir.join("sample.png");
    std::fs::write(&input, sample()).unwrap();

    let result = emf_file_to_png_file(&input, &output, 96).unwrap();
    assert_eq!((result.width, result.height), (100, 50));
    assert_eq!(std::fs::read(&output).unwrap(), result.png);

    let emf_base64 = emf_file_to_emf_base64(&input).unwrap();
    assert_eq!(emf_base64, to_base64(&sample()));
    assert_eq!(emf_file_to_emf_uri(&input).unwrap(), emf_base64_to_emf_uri(&emf_base64));

    assert!(matches!(
        emf_file_to_png_file(dir.join("missing.emf"), &output, 96),
        Err(ConvertError::Io(_))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_document_parse() {
    let doc = EmfDocument::parse(&sample()).unwrap();
    assert!(!doc.truncated);
    assert!(doc.malformed.is_empty());
    assert_eq!(doc.records.len(), 2);
    assert!(matches!(doc.records[0].record, Record::Rectangle(_)));
    assert!(matches!(doc.records[1].record, Record::Eof));
    assert_eq!(doc.records[0].offset, 88);
}

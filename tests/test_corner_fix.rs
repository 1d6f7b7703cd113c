use std::path::Path;

use ndarray::Array2;

use bagmerge::core::corner_fix::{corrected_document, fix_corner_points};
use bagmerge::{BagError, BaseGeometry, ContainerFile, ContainerStore, MemoryStore, OpenMode};

/// Embedded document in the shape upstream producers emit: ISO-style
/// namespaced extent block with a wrong northeast corner.
fn sample_doc(rows: u32, cols: u32, x_res: f64, y_res: f64, sw: (f64, f64)) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gmi:MI_Metadata xmlns:gmi="http://www.isotc211.org/2005/gmi" xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco" xmlns:gml="http://www.opengis.net/gml/3.2">
  <gmd:spatialRepresentationInfo>
    <gmd:MD_Georectified>
      <gmd:axisDimensionProperties>
        <gmd:MD_Dimension>
          <gmd:dimensionSize><gco:Integer>{rows}</gco:Integer></gmd:dimensionSize>
          <gmd:resolution><gco:Measure uom="m">{x_res}</gco:Measure></gmd:resolution>
        </gmd:MD_Dimension>
      </gmd:axisDimensionProperties>
      <gmd:axisDimensionProperties>
        <gmd:MD_Dimension>
          <gmd:dimensionSize><gco:Integer>{cols}</gco:Integer></gmd:dimensionSize>
          <gmd:resolution><gco:Measure uom="m">{y_res}</gco:Measure></gmd:resolution>
        </gmd:MD_Dimension>
      </gmd:axisDimensionProperties>
      <gmd:cornerPoints>
        <gml:Point gml:id="p1">
          <gml:coordinates>{sw_x},{sw_y} 999.0,999.0</gml:coordinates>
        </gml:Point>
      </gmd:cornerPoints>
    </gmd:MD_Georectified>
  </gmd:spatialRepresentationInfo>
  <gmd:lineage><gmd:LI_Lineage/></gmd:lineage>
</gmi:MI_Metadata>"#,
        sw_x = sw.0,
        sw_y = sw.1,
    )
}

/// Pull the coordinate pairs back out of a document.
fn coordinates_of(doc: &str) -> Vec<f64> {
    let start = doc.find("<gml:coordinates>").unwrap() + "<gml:coordinates>".len();
    let end = doc.find("</gml:coordinates>").unwrap();
    doc[start..end]
        .split_whitespace()
        .flat_map(|pair| pair.split(','))
        .map(|v| v.parse().unwrap())
        .collect()
}

#[test]
fn test_northeast_corner_is_recomputed_exactly() {
    let rows = 500;
    let cols = 400;
    let (x_res, y_res) = (1.0, 2.0);
    let sw = (400_000.0, 4_000_000.0);

    let doc = sample_doc(rows, cols, x_res, y_res, sw);
    let fixed = corrected_document(doc.as_bytes()).unwrap();
    let fixed = String::from_utf8(fixed).unwrap();

    let coords = coordinates_of(&fixed);
    assert_eq!(coords.len(), 4);
    assert_eq!(coords[0], sw.0);
    assert_eq!(coords[1], sw.1);
    // northeast = southwest + (count - 1) * resolution, exact on both axes
    assert_eq!(coords[2], sw.0 + (cols - 1) as f64 * x_res);
    assert_eq!(coords[3], sw.1 + (rows - 1) as f64 * y_res);
}

#[test]
fn test_everything_but_the_corner_text_is_preserved() {
    let doc = sample_doc(100, 200, 0.5, 0.5, (10.0, 20.0));
    let fixed = String::from_utf8(corrected_document(doc.as_bytes()).unwrap()).unwrap();

    assert!(fixed.contains(r#"<gco:Measure uom="m">0.5</gco:Measure>"#));
    assert!(fixed.contains(r#"<gml:Point gml:id="p1">"#));
    assert!(fixed.contains("<gmd:LI_Lineage/>"));
    assert!(fixed.contains("<gco:Integer>100</gco:Integer>"));
}

#[test]
fn test_missing_fields_are_malformed() {
    // no resolution measures
    let doc = r#"<m><gmd:dimensionSize><gco:Integer>5</gco:Integer></gmd:dimensionSize>
        <gmd:dimensionSize><gco:Integer>5</gco:Integer></gmd:dimensionSize>
        <gml:coordinates>0,0 1,1</gml:coordinates></m>"#
        .replace("gmd:", "")
        .replace("gco:", "")
        .replace("gml:", "");
    assert!(matches!(
        corrected_document(doc.as_bytes()),
        Err(BagError::MalformedMetadata(_))
    ));

    // no coordinates element at all
    let doc = sample_doc(10, 10, 1.0, 1.0, (0.0, 0.0)).replace("gml:coordinates", "gml:pos");
    assert!(matches!(
        corrected_document(doc.as_bytes()),
        Err(BagError::MalformedMetadata(_))
    ));
}

#[test]
fn test_wrong_pair_count_is_malformed() {
    let doc = sample_doc(10, 10, 1.0, 1.0, (0.0, 0.0)).replace(
        "0,0 999.0,999.0",
        "0,0 1,1 2,2",
    );
    assert!(matches!(
        corrected_document(doc.as_bytes()),
        Err(BagError::MalformedMetadata(_))
    ));
}

#[test]
fn test_non_numeric_dimension_is_malformed() {
    let doc = sample_doc(10, 10, 1.0, 1.0, (0.0, 0.0))
        .replace("<gco:Integer>10</gco:Integer>", "<gco:Integer>many</gco:Integer>");
    assert!(matches!(
        corrected_document(doc.as_bytes()),
        Err(BagError::MalformedMetadata(_))
    ));
}

fn geometry(rows: usize, cols: usize) -> BaseGeometry {
    BaseGeometry {
        rows,
        cols,
        cell_size: (1.0, 1.0),
        origin: (400_000.0, 4_000_000.0),
        nodata: 1_000_000.0,
    }
}

#[test]
fn test_fix_produces_corrected_copy_and_leaves_input_alone() {
    let store = MemoryStore::new();
    let doc = sample_doc(3, 3, 1.0, 1.0, (400_000.0, 4_000_000.0));
    store
        .insert(
            Path::new("in.bag"),
            ContainerFile::new(
                "1.6.2",
                geometry(3, 3),
                Array2::zeros((3, 3)),
                Array2::zeros((3, 3)),
                doc.clone().into_bytes(),
            )
            .unwrap(),
        )
        .unwrap();

    fix_corner_points(&store, Path::new("in.bag"), Path::new("in_fixed.bag")).unwrap();

    let original = store.open(Path::new("in.bag"), OpenMode::Read).unwrap();
    assert_eq!(original.metadata_document().unwrap(), doc.as_bytes());

    let fixed = store.open(Path::new("in_fixed.bag"), OpenMode::Read).unwrap();
    let fixed_doc = String::from_utf8(fixed.metadata_document().unwrap()).unwrap();
    let coords = coordinates_of(&fixed_doc);
    assert_eq!(coords[2], 400_002.0);
    assert_eq!(coords[3], 4_000_002.0);
}

#[test]
fn test_failed_fix_removes_the_partial_copy() {
    let store = MemoryStore::new();
    store
        .insert(
            Path::new("bad.bag"),
            ContainerFile::new(
                "1.6.2",
                geometry(2, 2),
                Array2::zeros((2, 2)),
                Array2::zeros((2, 2)),
                b"<metadata><extent/></metadata>".to_vec(),
            )
            .unwrap(),
        )
        .unwrap();

    let result = fix_corner_points(&store, Path::new("bad.bag"), Path::new("bad_fixed.bag"));
    assert!(matches!(result, Err(BagError::MalformedMetadata(_))));
    assert!(!store.exists(Path::new("bad_fixed.bag")));
}

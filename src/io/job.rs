//! Conversion job specification.
//!
//! Jobs are described by a small XML document rather than paths baked into
//! code. Layer order is precedence order: later layers overwrite earlier
//! ones wherever they hold valid data, so observed surfaces (MBES/SBES)
//! belong last and interpolated surfaces first.
//!
//! ```xml
//! <conversionJob>
//!   <output>/surveys/H12286_MB_1m_MLLW_v2.1.bag</output>
//!   <layer>
//!     <name>Interpolated</name>
//!     <data>/surveys/H12286_MB_1m_MLLW_interp_1of2.bag</data>
//!     <survey>/surveys/H12286_Survey_Metadata.xml</survey>
//!   </layer>
//!   <layer>
//!     <name>MBES</name>
//!     <data>/surveys/H12286_MB_1m_MLLW_1of2.bag</data>
//!     <survey>/surveys/H12286_Survey_Metadata.xml</survey>
//!   </layer>
//! </conversionJob>
//! ```

use std::path::{Path, PathBuf};

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::types::{BagError, BagResult};

/// One input layer of a conversion job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobLayer {
    /// Operator-facing display name
    pub name: String,
    /// Source container path
    pub data: PathBuf,
    /// Survey-description document path
    pub survey: PathBuf,
}

impl JobLayer {
    /// Grid name used for survey lookup: the container file stem.
    pub fn grid_name(&self) -> BagResult<String> {
        self.data
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BagError::InvalidJob(format!(
                    "layer '{}' has no usable file name in '{}'",
                    self.name,
                    self.data.display()
                ))
            })
    }
}

/// Ordered conversion job: layers in precedence order plus the output path.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub output: PathBuf,
    #[serde(rename = "layer", default)]
    pub layers: Vec<JobLayer>,
}

impl JobSpec {
    pub fn from_xml_str(xml: &str) -> BagResult<Self> {
        let spec: JobSpec =
            from_str(xml).map_err(|e| BagError::InvalidJob(format!("job document: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_path(path: &Path) -> BagResult<Self> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml)
    }

    fn validate(&self) -> BagResult<()> {
        if self.output.as_os_str().is_empty() {
            return Err(BagError::InvalidJob("output path is empty".to_string()));
        }
        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(BagError::InvalidJob(format!(
                    "layer for '{}' has an empty name",
                    layer.data.display()
                )));
            }
            if layer.data.as_os_str().is_empty() || layer.survey.as_os_str().is_empty() {
                return Err(BagError::InvalidJob(format!(
                    "layer '{}' is missing a data or survey path",
                    layer.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_layer_order_is_preserved() {
        let xml = r#"<conversionJob>
            <output>out.bag</output>
            <layer><name>Interpolated</name><data>interp.bag</data><survey>meta.xml</survey></layer>
            <layer><name>MBES</name><data>mbes.bag</data><survey>meta.xml</survey></layer>
        </conversionJob>"#;
        let spec = JobSpec::from_xml_str(xml).unwrap();
        assert_eq!(spec.output, PathBuf::from("out.bag"));
        assert_eq!(spec.layers.len(), 2);
        assert_eq!(spec.layers[0].name, "Interpolated");
        assert_eq!(spec.layers[1].name, "MBES");
        assert_eq!(spec.layers[1].grid_name().unwrap(), "mbes");
    }

    #[test]
    fn test_job_without_output_is_rejected() {
        let xml = r#"<conversionJob>
            <output></output>
            <layer><name>MBES</name><data>mbes.bag</data><survey>meta.xml</survey></layer>
        </conversionJob>"#;
        assert!(matches!(
            JobSpec::from_xml_str(xml),
            Err(BagError::InvalidJob(_))
        ));
    }
}

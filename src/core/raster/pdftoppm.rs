//! Page renderer backed by poppler's `pdftoppm`.

use super::PageRenderer;
use crate::core::cache::Scale;
use crate::error::RenderError;
use image::RgbaImage;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Renders pages by running `pdftoppm -png` into a scratch directory
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    binary: PathBuf,
}

impl PdftoppmRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

/// Page number from an output name such as `page-07.png`
fn page_number(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .rsplit('-')
        .next()?
        .parse()
        .ok()
}

impl PageRenderer for PdftoppmRenderer {
    fn render(&self, path: &Path, scale: Scale) -> Result<Vec<RgbaImage>, RenderError> {
        if !path.is_file() {
            return Err(RenderError::MissingInput {
                path: path.to_path_buf(),
            });
        }

        let scratch = tempfile::Builder::new()
            .prefix("pdf-gate-render")
            .tempdir()
            .map_err(|e| RenderError::Transient(format!("cannot create scratch dir: {}", e)))?;

        debug!(
            target: "pdf_gate::raster",
            path = %path.display(),
            dpi = scale.dpi(),
            "running pdftoppm"
        );

        let output = Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(scale.dpi().to_string())
            .arg(path)
            .arg(scratch.path().join("page"))
            .output();

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RenderError::Unsupported {
                    path: path.to_path_buf(),
                    reason: format!("{} is not installed", self.binary.display()),
                })
            }
            Err(e) => return Err(RenderError::Transient(e.to_string())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            // Exit code 1 means the PDF could not be opened, 3 a permissions problem
            return Err(match output.status.code() {
                Some(1) | Some(3) => RenderError::Unsupported {
                    path: path.to_path_buf(),
                    reason: stderr,
                },
                code => RenderError::Transient(format!("pdftoppm exited with {:?}: {}", code, stderr)),
            });
        }

        let mut rendered: Vec<(u32, PathBuf)> = fs::read_dir(scratch.path())
            .map_err(|e| RenderError::Transient(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .filter_map(|p| page_number(&p).map(|n| (n, p)))
            .collect();
        rendered.sort_by_key(|(number, _)| *number);

        rendered
            .into_iter()
            .map(|(_, page)| {
                image::open(&page)
                    .map(|decoded| decoded.to_rgba8())
                    .map_err(|e| RenderError::Transient(format!("unreadable render output: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn page_numbers_are_parsed_from_output_names() {
        assert_eq!(page_number(Path::new("/tmp/x/page-1.png")), Some(1));
        assert_eq!(page_number(Path::new("/tmp/x/page-012.png")), Some(12));
        assert_eq!(page_number(Path::new("/tmp/x/cover.png")), None);
    }

    #[test]
    fn missing_input_is_reported() {
        let renderer = PdftoppmRenderer::default();
        let err = renderer
            .render(Path::new("/definitely/not/here.pdf"), Scale::default())
            .unwrap_err();

        assert!(matches!(err, RenderError::MissingInput { .. }));
    }

    #[test]
    fn missing_binary_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let pdf = dir.path().join("doc.pdf");
        fs::write(&pdf, b"%PDF-1.4").unwrap();

        let renderer = PdftoppmRenderer::new(dir.path().join("no-such-pdftoppm"));
        let err = renderer.render(&pdf, Scale::default()).unwrap_err();

        assert!(matches!(err, RenderError::Unsupported { .. }));
        assert!(!err.is_transient());
    }
}

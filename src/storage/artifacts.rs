use std::path::{Path, PathBuf};

const UPLOADS_DIR: &str = "uploads";
const RESULTS_DIR: &str = "results";
const URL_PREFIX: &str = "static";
const ENCODABLE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// A file written under the static directory, with the reference that is
/// stored in history and served over HTTP.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub reference: String,
}

/// Uploaded originals and annotated results, laid out as
/// `<static_dir>/uploads/<name>` and `<static_dir>/results/result_<name>`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(UPLOADS_DIR))?;
        std::fs::create_dir_all(root.join(RESULTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores the raw upload under a collision-resistant name.
    pub fn save_upload(&self, client_name: &str, data: &[u8]) -> std::io::Result<StoredArtifact> {
        let file_name = format!(
            "{}_{}",
            uuid::Uuid::new_v4().simple(),
            sanitize_file_name(client_name)
        );
        self.write(UPLOADS_DIR, file_name, data)
    }

    pub fn save_result(&self, file_name: String, data: &[u8]) -> std::io::Result<StoredArtifact> {
        self.write(RESULTS_DIR, file_name, data)
    }

    fn write(&self, dir: &str, file_name: String, data: &[u8]) -> std::io::Result<StoredArtifact> {
        let path = self.root.join(dir).join(&file_name);
        std::fs::write(&path, data)?;
        Ok(StoredArtifact {
            reference: format!("{URL_PREFIX}/{dir}/{file_name}"),
            file_name,
            path,
        })
    }
}

/// Keeps the final path component and replaces anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Name and encoder extension (e.g. ".jpg") for the annotated copy of an
/// upload. Uploads in formats the encoder cannot write get a PNG result.
pub fn result_file_name(upload_name: &str) -> (String, String) {
    let ext = Path::new(upload_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) if ENCODABLE_EXTENSIONS.contains(&ext.as_str()) => {
            (format!("result_{upload_name}"), format!(".{ext}"))
        }
        _ => (format!("result_{upload_name}.png"), ".png".to_string()),
    }
}

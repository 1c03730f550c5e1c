use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::DocxError;

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const STYLES_PART: &str = "word/styles.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

#[derive(Clone)]
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

#[derive(Clone)]
pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn read(path: &Path) -> Result<Self, DocxError> {
        let f = File::open(path)?;
        Self::from_reader(f)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocxError> {
        Self::from_reader(Cursor::new(bytes))
    }

    fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, DocxError> {
        let mut zip = ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn require_part(&self, name: &str) -> Result<&[u8], DocxError> {
        self.part(name)
            .ok_or_else(|| DocxError::MissingPart(name.to_string()))
    }

    /// Stable identifier of the main document content.
    pub fn document_id(&self) -> Result<String, DocxError> {
        let bytes = self.require_part(DOCUMENT_PART)?;
        let digest = Sha256::digest(bytes);
        Ok(hex::encode(&digest[..8]))
    }

    /// Serialize the package, substituting the data of any entry named in `replacements`.
    /// Every other entry keeps its original bytes, compression and metadata.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<W, DocxError> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements
                .get(&ent.name)
                .map(|d| d.as_slice())
                .unwrap_or(ent.data.as_slice());
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)?;
            } else {
                zout.start_file(&ent.name, opts)?;
                zout.write_all(data)?;
            }
        }
        Ok(zout.finish()?)
    }

    /// Write to a temporary sibling of `output_path` and rename it into place, so a
    /// failure never leaves a half-written file at the final path.
    pub fn write_atomic(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<(), DocxError> {
        let tmp = temp_path_for(output_path);
        let result = File::create(&tmp)
            .map_err(DocxError::from)
            .and_then(|f| self.write_to(f, replacements))
            .and_then(|mut f| f.flush().map_err(DocxError::from))
            .and_then(|_| fs::rename(&tmp, output_path).map_err(DocxError::from));
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

fn temp_path_for(output_path: &Path) -> PathBuf {
    let file_name = output_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output.docx");
    output_path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    pub const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

    /// Wrap body markup into a complete `word/document.xml`.
    pub fn document_xml(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {W_NS}><w:body>{body}<w:sectPr/></w:body></w:document>"#
        )
    }

    pub fn styles_xml(styles: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:styles {W_NS}>{styles}</w:styles>"#
        )
    }

    /// Build an in-memory DOCX with the given parts.
    pub fn build_docx(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in parts {
            zout.start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            zout.write_all(body.as_bytes()).expect("write");
        }
        zout.finish().expect("finish").into_inner()
    }

    pub fn simple_docx(body: &str, styles: &str) -> Vec<u8> {
        build_docx(&[
            ("[Content_Types].xml", "<Types/>"),
            ("word/document.xml", &document_xml(body)),
            ("word/styles.xml", &styles_xml(styles)),
        ])
    }
}

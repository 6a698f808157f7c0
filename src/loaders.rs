//! Extracción de texto por formato (PDF por páginas, TXT y DOCX).

use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use roxmltree::Document;
use serde::Serialize;
use zip::ZipArchive;

const WORDPROCESSING_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Formatos aceptados en la subida.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Txt,
    Docx,
}

impl DocumentKind {
    pub const ACCEPTED: [&'static str; 3] = ["pdf", "txt", "docx"];

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

/// Texto extraído de una página (o del documento entero si no hay páginas).
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

/// Extrae el texto de un fichero según su tipo. El PDF se parsea en un hilo
/// bloqueante porque `pdf-extract` es síncrono y puede tardar.
pub async fn load(kind: DocumentKind, bytes: Vec<u8>) -> Result<Vec<PageText>> {
    match kind {
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || load_pdf(&bytes))
            .await
            .context("la tarea de extracción del PDF falló")?,
        DocumentKind::Txt => load_txt(&bytes).map(|text| vec![PageText { page: None, text }]),
        DocumentKind::Docx => load_docx(&bytes).map(|text| vec![PageText { page: None, text }]),
    }
}

fn load_pdf(bytes: &[u8]) -> Result<Vec<PageText>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| anyhow!("no se pudo extraer texto del PDF: {e}"))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(index, text)| PageText {
            page: Some(index as u32),
            text,
        })
        .collect())
}

fn load_txt(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| anyhow!("el fichero de texto no está codificado en UTF-8"))
}

/// Texto de los párrafos de `word/document.xml`, separados por líneas en blanco.
fn load_docx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).context("el DOCX no es un archivo ZIP válido")?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("al DOCX le falta word/document.xml")?
        .read_to_string(&mut document_xml)
        .context("no se pudo leer word/document.xml")?;

    let doc = Document::parse(&document_xml).context("XML del DOCX mal formado")?;

    // Un `w:p` dentro de un cuadro de texto es su propio párrafo: su texto no
    // cuenta para el párrafo exterior.
    let paragraphs: Vec<String> = doc
        .descendants()
        .filter(|node| node.has_tag_name((WORDPROCESSING_NS, "p")))
        .map(|paragraph| {
            paragraph
                .descendants()
                .filter(|node| node.has_tag_name((WORDPROCESSING_NS, "t")))
                .filter(|node| {
                    node.ancestors()
                        .find(|a| a.has_tag_name((WORDPROCESSING_NS, "p")))
                        .is_some_and(|owner| owner == paragraph)
                })
                .filter_map(|node| node.text())
                .collect::<String>()
        })
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
        .collect();

    Ok(paragraphs.join("\n\n"))
}

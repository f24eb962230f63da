use crate::error::EtlError;
use scraper::{Html, Selector};

fn selector(s: &str) -> Result<Selector, EtlError> {
    Selector::parse(s).map_err(|e| EtlError::UnexpectedPage(format!("selector {}: {:?}", s, e)))
}

// ── Folder browser ────────────────────────────────────────────────────────────

/// Child folder labels of the folder currently open in the document browser.
///
/// The browser renders a breadcrumb list first and the folder listing second.
pub fn parse_folder_labels(html: &str) -> Result<Vec<String>, EtlError> {
    let doc = Html::parse_document(html);
    let container_sel = selector("div#browserDocument")?;
    let ul_sel = selector("ul")?;
    let li_sel = selector("li")?;

    let container = doc
        .select(&container_sel)
        .next()
        .ok_or_else(|| EtlError::UnexpectedPage("div#browserDocument not found".into()))?;

    let listing = container
        .select(&ul_sel)
        .nth(1)
        .ok_or_else(|| EtlError::UnexpectedPage("folder listing not found".into()))?;

    Ok(listing
        .select(&li_sel)
        .map(|li| li.text().collect::<String>().trim().to_string())
        .collect())
}

// ── Document table ────────────────────────────────────────────────────────────

/// File names listed in the document table (third column, as rendered).
pub fn parse_document_names(html: &str) -> Result<Vec<String>, EtlError> {
    let doc = Html::parse_document(html);
    let table_sel = selector("table#tbDocumentLibrary")?;
    let row_sel = selector("tbody tr")?;
    let td_sel = selector("td")?;

    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| EtlError::UnexpectedPage("table#tbDocumentLibrary not found".into()))?;

    Ok(table
        .select(&row_sel)
        .filter_map(|tr| tr.select(&td_sel).nth(2))
        .map(|td| td.text().collect::<String>())
        .collect())
}


#[cfg(test)]
mod tests {
    use super::fixtures::portal_page;
    use super::*;

    #[test]
    fn test_parse_folder_labels_skips_breadcrumb() {
        let html = portal_page(&[" 01_Enero 2019 ", "02_Febrero 2019"], &[]);
        assert_eq!(
            parse_folder_labels(&html).unwrap(),
            vec!["01_Enero 2019", "02_Febrero 2019"]
        );
    }

    #[test]
    fn test_parse_folder_labels_missing_container() {
        let err = parse_folder_labels("<html><body><p>maintenance</p></body></html>").unwrap_err();
        assert!(matches!(err, EtlError::UnexpectedPage(_)));
    }

    #[test]
    fn test_parse_document_names() {
        let html = portal_page(&[], &["ResumenCuadros_07.xlsx", "Anexo.pdf"]);
        assert_eq!(
            parse_document_names(&html).unwrap(),
            vec!["ResumenCuadros_07.xlsx", "Anexo.pdf"]
        );
        assert!(parse_document_names("<div></div>").is_err());
    }
}

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Where a lookup starts: the row element itself, or its nth cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Row,
    Cell(usize),
}

/// A scope plus an optional descendant selector inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub scope: Scope,
    pub selector: Option<&'static str>,
}

impl Target {
    pub const fn cell(index: usize) -> Self {
        Target { scope: Scope::Cell(index), selector: None }
    }

    pub const fn within(index: usize, selector: &'static str) -> Self {
        Target { scope: Scope::Cell(index), selector: Some(selector) }
    }

    pub const fn row() -> Self {
        Target { scope: Scope::Row, selector: None }
    }

    pub const fn in_row(selector: &'static str) -> Self {
        Target { scope: Scope::Row, selector: Some(selector) }
    }
}

/// Row-scoped lookups over one rendered table row.
pub trait CellAccessor {
    fn exists(&self, target: &Target) -> bool;
    /// Text of the first element the target resolves to.
    fn text(&self, target: &Target) -> Option<String>;
    /// Text of every element the target resolves to, in document order.
    fn texts(&self, target: &Target) -> Vec<String>;
    /// Attribute of the first element the target resolves to.
    fn attr(&self, target: &Target, name: &str) -> Option<String>;
}

/// A row parsed out of its outer markup with `scraper`.
pub struct HtmlRow {
    doc: Html,
    row_selector: Selector,
    cell_selector: Selector,
}

impl HtmlRow {
    /// `markup` is the outer HTML of a `<tr>`. It is re-wrapped in a table so
    /// the parser keeps the row and cell elements.
    pub fn parse(markup: &str, cell_selector: &str) -> Option<Self> {
        let doc = Html::parse_fragment(&format!("<table><tbody>{}</tbody></table>", markup));
        Some(HtmlRow {
            doc,
            row_selector: compile("tr")?,
            cell_selector: compile(cell_selector)?,
        })
    }

    fn row(&self) -> Option<ElementRef<'_>> {
        self.doc.select(&self.row_selector).next()
    }

    fn scope(&self, scope: Scope) -> Option<ElementRef<'_>> {
        let row = self.row()?;
        match scope {
            Scope::Row => Some(row),
            Scope::Cell(i) => row.select(&self.cell_selector).nth(i),
        }
    }

    fn resolve(&self, target: &Target) -> Vec<ElementRef<'_>> {
        let Some(base) = self.scope(target.scope) else {
            return Vec::new();
        };
        match target.selector {
            None => vec![base],
            Some(sel) => match compile(sel) {
                Some(s) => base.select(&s).collect(),
                None => Vec::new(),
            },
        }
    }
}

impl CellAccessor for HtmlRow {
    fn exists(&self, target: &Target) -> bool {
        !self.resolve(target).is_empty()
    }

    fn text(&self, target: &Target) -> Option<String> {
        self.resolve(target).first().map(element_text)
    }

    fn texts(&self, target: &Target) -> Vec<String> {
        self.resolve(target).iter().map(element_text).collect()
    }

    fn attr(&self, target: &Target, name: &str) -> Option<String> {
        self.resolve(target)
            .first()
            .and_then(|el| el.value().attr(name))
            .map(str::to_string)
    }
}

pub(crate) fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            debug!("invalid selector {:?}: {}", selector, e);
            None
        }
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect()
}

//! Таблица региональных страниц каталога.
//!
//! Каждая страница вида `/destination/africa/africa-kenya` или
//! `/packages/collections/group-tours/europe-group-tours` - это строка таблицы:
//! раздел, slug, заголовок, hero-картинка, вводный текст и фильтр пакетов.
//! Таблица встроена в бинарник (`regions.json`) и проверяется при старте.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{is_slug, PackageFilter};

const DEFAULT_TABLE: &str = include_str!("regions.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("region table is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate page '{section}/{slug}'")]
    DuplicatePage { section: String, slug: String },
    #[error("duplicate section '{0}'")]
    DuplicateSection(String),
    #[error("page '{section}/{slug}' has an empty filter")]
    EmptyFilter { section: String, slug: String },
    #[error("'{0}' is not a lowercase kebab-case slug")]
    BadSlug(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    /// `/destination/{region}/{slug}`
    Region,
    /// `/packages/collections/{collection}/{slug}`
    Collection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageFilter {
    pub category: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

impl PageFilter {
    fn is_empty(&self) -> bool {
        self.category.is_none() && self.country.is_none() && self.region.is_none()
    }

    pub fn to_package_filter(&self) -> PackageFilter {
        PackageFilter {
            category: self.category.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            ..PackageFilter::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionPage {
    pub slug: String,
    pub title: String,
    pub filter: PageFilter,
    pub hero_image: Option<String>,
    #[serde(default)]
    pub intro: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub slug: String,
    pub title: String,
    pub kind: SectionKind,
    pub pages: Vec<RegionPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionTable {
    sections: Vec<Section>,
}

impl RegionTable {
    pub fn load_default() -> Result<Self, CatalogError> {
        Self::from_json(DEFAULT_TABLE)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let table: RegionTable = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut sections = HashSet::new();
        for section in &self.sections {
            if !is_slug(&section.slug) {
                return Err(CatalogError::BadSlug(section.slug.clone()));
            }
            if !sections.insert(section.slug.as_str()) {
                return Err(CatalogError::DuplicateSection(section.slug.clone()));
            }

            let mut pages = HashSet::new();
            for page in &section.pages {
                if !is_slug(&page.slug) {
                    return Err(CatalogError::BadSlug(page.slug.clone()));
                }
                if !pages.insert(page.slug.as_str()) {
                    return Err(CatalogError::DuplicatePage {
                        section: section.slug.clone(),
                        slug: page.slug.clone(),
                    });
                }
                if page.filter.is_empty() {
                    return Err(CatalogError::EmptyFilter {
                        section: section.slug.clone(),
                        slug: page.slug.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, kind: SectionKind, slug: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.kind == kind && s.slug == slug)
    }

    pub fn page(&self, kind: SectionKind, section: &str, slug: &str) -> Option<&RegionPage> {
        self.section(kind, section)?
            .pages
            .iter()
            .find(|p| p.slug == slug)
    }

    pub fn page_count(&self) -> usize {
        self.sections.iter().map(|s| s.pages.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_is_valid() {
        let table = RegionTable::load_default().expect("embedded table must load");
        assert!(table.page_count() > 40);

        let kenya = table
            .page(SectionKind::Region, "africa", "africa-kenya")
            .expect("kenya page");
        assert_eq!(kenya.filter.category.as_deref(), Some("africa-kenya"));
        assert!(table
            .page(SectionKind::Collection, "group-tours", "europe-group-tours")
            .is_some());
    }

    #[test]
    fn kind_is_part_of_the_lookup() {
        let table = RegionTable::load_default().unwrap();
        assert!(table.page(SectionKind::Collection, "africa", "africa-kenya").is_none());
        assert!(table.page(SectionKind::Region, "africa", "atlantis").is_none());
    }

    #[test]
    fn duplicate_pages_are_rejected() {
        let raw = r#"{"sections":[{"slug":"asia","title":"Asia","kind":"region","pages":[
            {"slug":"asia-japan","title":"Japan","filter":{"category":"asia-japan"}},
            {"slug":"asia-japan","title":"Japan again","filter":{"category":"asia-japan"}}
        ]}]}"#;
        assert!(matches!(
            RegionTable::from_json(raw),
            Err(CatalogError::DuplicatePage { .. })
        ));
    }

    #[test]
    fn empty_filters_and_bad_slugs_are_rejected() {
        let empty = r#"{"sections":[{"slug":"asia","title":"Asia","kind":"region","pages":[
            {"slug":"asia-japan","title":"Japan","filter":{}}
        ]}]}"#;
        assert!(matches!(
            RegionTable::from_json(empty),
            Err(CatalogError::EmptyFilter { .. })
        ));

        let bad = r#"{"sections":[{"slug":"Asia","title":"Asia","kind":"region","pages":[]}]}"#;
        assert!(matches!(RegionTable::from_json(bad), Err(CatalogError::BadSlug(_))));
    }

    #[test]
    fn slug_rules() {
        assert!(is_slug("africa-kenya"));
        assert!(is_slug("top-10"));
        assert!(!is_slug("africa--kenya"));
        assert!(!is_slug("-kenya"));
        assert!(!is_slug("Kenya"));
        assert!(!is_slug(""));
    }
}

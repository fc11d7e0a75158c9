//! Release manifest model and update variant selection
//!
//! A release carries several archives: colour/theme builds of the application
//! plus auxiliary bundles that are not code updates. The catalog filters the
//! asset list down to installable variants and picks the default one.

use crate::utils::{ends_with_ignore_case, starts_with_ignore_case};

// ============================================================================
// Manifest Types
// ============================================================================

/// A published release, as returned by the release-hosting API
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseManifest {
    pub tag: String,
    pub notes: String,
    pub assets: Vec<AssetDescriptor>,
}

impl ReleaseManifest {
    /// Version number from the tag, without a leading `v`
    pub fn version(&self) -> &str {
        self.tag.trim_start_matches(['v', 'V'])
    }
}

/// A downloadable file attached to a release. Identity is the name.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetDescriptor {
    pub name: String,
    pub download_url: String,
    pub size_bytes: Option<u64>,
}

/// An asset that passed the selection rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateVariant {
    pub display_name: String,
    pub file_name: String,
    pub download_url: String,
}

// ============================================================================
// Selection Rules
// ============================================================================

#[derive(Debug, Clone)]
pub struct SelectionRules {
    pub prefix: String,
    pub extension: String,
    pub excluded: Vec<String>,
    pub default_name: String,
}

impl SelectionRules {
    pub fn qualifies(&self, asset_name: &str) -> bool {
        starts_with_ignore_case(asset_name, &self.prefix)
            && ends_with_ignore_case(asset_name, &self.extension)
            && !self
                .excluded
                .iter()
                .any(|ex| ex.eq_ignore_ascii_case(asset_name))
    }

    /// "Default Theme" for the canonical asset, "<Suffix> Theme" for `Prefix<Suffix>.zip`
    pub fn display_name(&self, file_name: &str) -> String {
        if file_name.eq_ignore_ascii_case(&self.default_name) {
            return "Default Theme".to_string();
        }

        let base = if ends_with_ignore_case(file_name, &self.extension) {
            &file_name[..file_name.len() - self.extension.len()]
        } else {
            file_name
        };

        if starts_with_ignore_case(base, &self.prefix) {
            let theme = base[self.prefix.len()..].trim();
            if theme.is_empty() {
                return "Default Theme".to_string();
            }
            return format!("{} Theme", theme);
        }

        base.to_string()
    }
}

// ============================================================================
// Variant Catalog
// ============================================================================

/// Ordered variants plus the index of the default one
#[derive(Debug, Clone, Default)]
pub struct VariantCatalog {
    variants: Vec<UpdateVariant>,
    default_index: Option<usize>,
}

impl VariantCatalog {
    pub fn variants(&self) -> &[UpdateVariant] {
        &self.variants
    }

    pub fn default_variant(&self) -> Option<&UpdateVariant> {
        self.default_index.and_then(|i| self.variants.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn find(&self, file_name: &str) -> Option<&UpdateVariant> {
        self.variants
            .iter()
            .find(|v| v.file_name.eq_ignore_ascii_case(file_name))
    }
}

/// Build the variant list for a release. An empty catalog means the release
/// has no installable build; that is not an error.
pub fn select_variants(manifest: &ReleaseManifest, rules: &SelectionRules) -> VariantCatalog {
    let variants: Vec<UpdateVariant> = manifest
        .assets
        .iter()
        .filter(|a| !a.download_url.is_empty() && rules.qualifies(&a.name))
        .map(|a| UpdateVariant {
            display_name: rules.display_name(&a.name),
            file_name: a.name.clone(),
            download_url: a.download_url.clone(),
        })
        .collect();

    let default_index = variants
        .iter()
        .position(|v| v.file_name.eq_ignore_ascii_case(&rules.default_name))
        .or(if variants.is_empty() { None } else { Some(0) });

    VariantCatalog {
        variants,
        default_index,
    }
}

/// Look up an auxiliary asset by exact (case-insensitive) name
pub fn find_named_asset<'a>(
    manifest: &'a ReleaseManifest,
    exact_name: &str,
) -> Option<&'a AssetDescriptor> {
    manifest
        .assets
        .iter()
        .find(|a| a.name.eq_ignore_ascii_case(exact_name))
}

/// Compare version strings
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    version_compare::compare_to(latest, current, version_compare::Cmp::Gt).unwrap_or(false)
}

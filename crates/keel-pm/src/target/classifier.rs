//! Classifies a target's file tree into build-input buckets.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::tools_version::ToolsVersion;

use super::{
    ClassifiedResource, ClassifiedSources, Diagnostic, ResourceLocalization, ResourceRule,
    TargetDescription,
};

const SOURCE_EXTENSIONS: &[&str] = &["kl"];
const HEADER_EXTENSIONS: &[&str] = &["h"];
/// Directory extensions recognized as single-file resources at tools
/// versions 5.3 up to 5.6.
const KNOWN_CONTENT_EXTENSIONS: &[&str] = &["assetpack", "datamodel", "atlas"];
const LOCALIZATION_SUFFIX: &str = ".lproj";
const BASE_LOCALIZATION: &str = "base";
const FORBIDDEN_ROOT_RESOURCE: &str = "info.plist";

/// Enumerate the pre-classification contents of a target: every file plus,
/// at tools version 5.3 and later, each directory-with-extension as a
/// single opaque entry. Excluded and hidden paths are filtered out.
pub fn enumerate_contents(target: &TargetDescription) -> Result<Vec<PathBuf>> {
    let (excludes, _) = validate_excludes(target);
    walk(&target.root, &excludes, target.tools_version)
}

/// Classify a target's tree into sources, resources, headers and others.
///
/// The four buckets are pairwise disjoint and, together, cover exactly the
/// enumerated contents. Hard errors surface as error-severity diagnostics
/// on the returned value.
pub fn classify(target: &TargetDescription) -> Result<ClassifiedSources> {
    let (excludes, mut diagnostics) = validate_excludes(target);
    let contents = walk(&target.root, &excludes, target.tools_version)?;

    let explicit_sources: Option<Vec<PathBuf>> = target
        .sources
        .as_ref()
        .map(|list| list.iter().map(|p| target.root.join(p)).collect());

    let resource_decls: Vec<(PathBuf, ResourceRule)> = target
        .resources
        .iter()
        .map(|r| (target.root.join(&r.path), r.rule.clone()))
        .collect();
    for (path, _) in &resource_decls {
        if !path.exists() {
            diagnostics.push(Diagnostic::warning(format!(
                "resource path '{}' in target '{}' does not exist",
                path.display(),
                target.name
            )));
        }
    }

    let mut result = ClassifiedSources::default();
    let mut bookkeeping = ResourceBookkeeping::default();

    for path in contents {
        if let Some(list) = &explicit_sources {
            if list.iter().any(|s| path.starts_with(s)) {
                result.sources.push(path);
                continue;
            }
        }

        if let Some((decl_root, rule)) = resource_decls
            .iter()
            .find(|(root, _)| path.starts_with(root))
        {
            classify_resource(
                target,
                &path,
                decl_root,
                rule,
                &mut result,
                &mut bookkeeping,
                &mut diagnostics,
            );
            continue;
        }

        if path.is_dir() {
            // Directory-with-extension entries only appear at 5.3+
            let extension = lower_extension(&path);
            if target.tools_version >= ToolsVersion::V5_6 {
                // An opaque content bundle; only the directory itself
                // appears in classification
                bookkeeping.record_plain(&path);
                result.resources.push(ClassifiedResource {
                    path,
                    rule: ResourceRule::Process { localization: None },
                    localization: None,
                });
            } else if extension
                .map(|e| KNOWN_CONTENT_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or(false)
            {
                bookkeeping.record_plain(&path);
                result.resources.push(ClassifiedResource {
                    path,
                    rule: ResourceRule::Process { localization: None },
                    localization: None,
                });
            } else {
                result.others.push(path);
            }
            continue;
        }

        match lower_extension(&path).as_deref() {
            Some(ext) if SOURCE_EXTENSIONS.contains(&ext) && explicit_sources.is_none() => {
                result.sources.push(path);
            }
            Some(ext) if HEADER_EXTENSIONS.contains(&ext) => {
                result.headers.push(path);
            }
            _ => result.others.push(path),
        }
    }

    diagnostics.extend(bookkeeping.finish(target));

    sort_lexicographically(&mut result.sources);
    result
        .resources
        .sort_by(|a, b| a.path.as_os_str().cmp(b.path.as_os_str()));
    sort_lexicographically(&mut result.headers);
    sort_lexicographically(&mut result.others);
    result.diagnostics = diagnostics;
    Ok(result)
}

fn classify_resource(
    target: &TargetDescription,
    path: &Path,
    decl_root: &Path,
    rule: &ResourceRule,
    result: &mut ClassifiedSources,
    bookkeeping: &mut ResourceBookkeeping,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match rule {
        ResourceRule::Copy => {
            // The declaration is copied wholesale under its own name; one
            // destination per declaration regardless of interior files
            bookkeeping.record_copy(decl_root, path);
            result.resources.push(ClassifiedResource {
                path: path.to_path_buf(),
                rule: rule.clone(),
                localization: None,
            });
        }
        ResourceRule::EmbedInCode => {
            // Embedded resources never land in the bundle; no destination
            result.resources.push(ClassifiedResource {
                path: path.to_path_buf(),
                rule: rule.clone(),
                localization: None,
            });
        }
        ResourceRule::Process { localization } => {
            let relative = path.strip_prefix(decl_root).unwrap_or(path);
            let components: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let localized = target.tools_version >= ToolsVersion::V5_3;
            let lproj = components
                .first()
                .filter(|_| localized)
                .and_then(|c| localization_name(c));

            let mut resource_localization = None;
            match lproj {
                Some(language) => {
                    if localization.is_some() {
                        diagnostics.push(Diagnostic::error(format!(
                            "resource '{}' in target '{}' declares a localization but lies inside the localization directory '{}{}'",
                            relative.display(),
                            target.name,
                            language,
                            LOCALIZATION_SUFFIX
                        )));
                    }
                    if components.len() > 2 {
                        diagnostics.push(Diagnostic::error(format!(
                            "localization directory '{}{}' in target '{}' contains sub-directories, which is not allowed",
                            language,
                            LOCALIZATION_SUFFIX,
                            target.name
                        )));
                    } else if let Some(file_name) = components.last().filter(|_| components.len() == 2) {
                        bookkeeping.record_localized(&language, file_name, path);
                    }
                    resource_localization = Some(language);
                }
                None => {
                    let file_name = components
                        .last()
                        .cloned()
                        .unwrap_or_else(|| display_name(path));
                    match localization {
                        Some(ResourceLocalization::Default) => {
                            let language = target
                                .default_localization
                                .clone()
                                .unwrap_or_else(|| "default".to_string());
                            bookkeeping.record_localized(&language, &file_name, path);
                            resource_localization = Some(language);
                        }
                        Some(ResourceLocalization::Base) => {
                            bookkeeping.record_localized("Base", &file_name, path);
                            resource_localization = Some("Base".to_string());
                        }
                        None => {
                            if file_name.to_lowercase() == FORBIDDEN_ROOT_RESOURCE {
                                diagnostics.push(Diagnostic::error(format!(
                                    "'{}' at the top of the resource tree of target '{}' is reserved and cannot be declared as a resource",
                                    file_name, target.name
                                )));
                            }
                            bookkeeping.record_unlocalized(&file_name, path);
                        }
                    }
                }
            }

            result.resources.push(ClassifiedResource {
                path: path.to_path_buf(),
                rule: rule.clone(),
                localization: resource_localization,
            });
        }
    }
}

/// Destination and localization bookkeeping across every resource in the
/// target; conflicts and localization gaps are reported once all files
/// have been seen.
#[derive(Default)]
struct ResourceBookkeeping {
    /// case-folded destination -> (display name, source paths)
    destinations: BTreeMap<String, (String, Vec<PathBuf>)>,
    copy_roots: HashSet<PathBuf>,
    unlocalized: BTreeMap<String, Vec<PathBuf>>,
    /// case-folded language -> file names
    localized: BTreeMap<String, HashSet<String>>,
    deferred: Vec<Diagnostic>,
}

impl ResourceBookkeeping {
    fn record_destination(&mut self, key: String, display: String, path: &Path) {
        let entry = self
            .destinations
            .entry(key)
            .or_insert_with(|| (display, Vec::new()));
        entry.1.push(path.to_path_buf());
    }

    fn record_unlocalized(&mut self, file_name: &str, path: &Path) {
        self.record_destination(file_name.to_string(), file_name.to_string(), path);
        self.unlocalized
            .entry(file_name.to_string())
            .or_default()
            .push(path.to_path_buf());
    }

    /// A plain single-entry resource (content bundles and the like).
    fn record_plain(&mut self, path: &Path) {
        let name = display_name(path);
        self.record_destination(name.clone(), name, path);
    }

    fn record_copy(&mut self, decl_root: &Path, _path: &Path) {
        if self.copy_roots.insert(decl_root.to_path_buf()) {
            let name = display_name(decl_root);
            self.record_destination(name.clone(), name, decl_root);
        }
    }

    /// Localization folder names are matched case-insensitively while
    /// diagnostics keep the casing as written.
    fn record_localized(&mut self, language: &str, file_name: &str, path: &Path) {
        let key = format!("{}{}/{}", language.to_lowercase(), LOCALIZATION_SUFFIX, file_name);
        self.record_destination(key, file_name.to_string(), path);
        self.localized
            .entry(language.to_lowercase())
            .or_default()
            .insert(file_name.to_string());
    }

    fn finish(&mut self, target: &TargetDescription) -> Vec<Diagnostic> {
        // Output-path conflicts: hard errors enumerating every source
        for (_, (display, paths)) in self.destinations.iter().filter(|(_, (_, p))| p.len() > 1) {
            self.deferred.push(Diagnostic::error(format!(
                "multiple resources named '{}' in target '{}'",
                display, target.name
            )));
            for path in paths {
                self.deferred
                    .push(Diagnostic::info(format!("found '{}'", path.display())));
            }
        }

        // The same file name in localized and un-localized variants
        let localized_names: HashSet<&String> =
            self.localized.values().flatten().collect();
        for name in self.unlocalized.keys() {
            if localized_names.contains(name) {
                self.deferred.push(Diagnostic::warning(format!(
                    "resource '{}' in target '{}' exists in both localized and un-localized variants",
                    name, target.name
                )));
            }
        }

        // Base-localized resources need a sibling under the default language
        if let Some(default_language) = &target.default_localization {
            let default_names = self
                .localized
                .get(&default_language.to_lowercase())
                .cloned()
                .unwrap_or_default();
            if let Some(base_names) = self.localized.get(BASE_LOCALIZATION) {
                for name in base_names {
                    if !default_names.contains(name) {
                        self.deferred.push(Diagnostic::warning(format!(
                            "resource '{}' in target '{}' is base-localized but has no variant for the default language '{}'",
                            name, target.name, default_language
                        )));
                    }
                }
            }
        }

        std::mem::take(&mut self.deferred)
    }
}

fn validate_excludes(target: &TargetDescription) -> (Vec<PathBuf>, Vec<Diagnostic>) {
    let mut valid = Vec::new();
    let mut diagnostics = Vec::new();

    for exclude in &target.excludes {
        let absolute = target.root.join(exclude);
        let invalid_reason = if !absolute.starts_with(&target.root) || exclude.is_absolute() {
            Some("lies outside the package root")
        } else if !absolute.exists() {
            Some("does not exist")
        } else {
            None
        };

        match invalid_reason {
            None => valid.push(absolute),
            Some(reason) => {
                if target.is_local {
                    let message = format!(
                        "exclude '{}' in target '{}' {}",
                        exclude.display(),
                        target.name,
                        reason
                    );
                    log::warn!("{}", message);
                    diagnostics.push(Diagnostic::warning(message));
                }
            }
        }
    }

    (valid, diagnostics)
}

fn walk(root: &Path, excludes: &[PathBuf], tools_version: ToolsVersion) -> Result<Vec<PathBuf>> {
    let mut contents = Vec::new();
    let mut iterator = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(entry) = iterator.next() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let path = entry.path().to_path_buf();
        if path == root {
            continue;
        }

        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if hidden || excludes.iter().any(|e| path.starts_with(e)) {
            if entry.file_type().is_dir() {
                iterator.skip_current_dir();
            }
            continue;
        }

        if entry.file_type().is_dir() {
            let extension = lower_extension(&path);
            let is_localization_dir = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase().ends_with(LOCALIZATION_SUFFIX))
                .unwrap_or(false);
            if tools_version >= ToolsVersion::V5_3 && extension.is_some() && !is_localization_dir {
                contents.push(path);
                iterator.skip_current_dir();
            }
            continue;
        }

        contents.push(path);
    }

    sort_lexicographically(&mut contents);
    Ok(contents)
}

/// Byte-wise path ordering; unlike component-wise `PathBuf` ordering it
/// keeps `some.thing` ahead of `some/...`.
fn sort_lexicographically(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// "en.lproj" -> "en", preserving the language's casing as written.
fn localization_name(component: &str) -> Option<String> {
    let lower = component.to_lowercase();
    if lower.ends_with(LOCALIZATION_SUFFIX) && component.len() > LOCALIZATION_SUFFIX.len() {
        Some(component[..component.len() - LOCALIZATION_SUFFIX.len()].to_string())
    } else {
        None
    }
}

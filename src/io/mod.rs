//! Resolving transformation specifiers into transformations.
use std::{
    collections::HashMap,
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;

use crate::{Affine, Error, Result, Xform};

pub(crate) mod typedstream;
pub(crate) mod xform_list;
pub use xform_list::INVERSE_MARKERS;

/// Maximum nesting of xform list files inside one another.
pub const MAX_LIST_DEPTH: usize = 8;

/// File names looked for inside a CMTK registration directory, in order.
const REGISTRATION_FILES: [&str; 2] = ["registration", "registration.gz"];

/// One transformation resolved from a specifier, and the direction to apply it in.
#[derive(Debug, Clone)]
pub struct LoadedXform {
    pub xform: Xform,
    pub inverse: bool,
}

impl LoadedXform {
    pub fn forward(xform: Xform) -> Self {
        Self {
            xform,
            inverse: false,
        }
    }
}

/// Reverse the transforms and flip each direction if the whole group is inverted.
pub(crate) fn orient(mut loaded: Vec<LoadedXform>, inverse: bool) -> Vec<LoadedXform> {
    if inverse {
        loaded.reverse();
        for l in loaded.iter_mut() {
            l.inverse = !l.inverse;
        }
    }
    loaded
}

/// Resolves a specifier into the transformations it names, in application order.
pub trait Loader {
    /// Any failure is an [Error::Load] naming the specifier.
    fn load(&self, specifier: &str) -> Result<Vec<LoadedXform>>;
}

impl<L: Loader + ?Sized> Loader for &L {
    fn load(&self, specifier: &str) -> Result<Vec<LoadedXform>> {
        (**self).load(specifier)
    }
}

/// Reads CMTK registrations from the file system.
///
/// A specifier may name
/// a registration directory (containing `registration` or `registration.gz`),
/// a typedstream file (optionally gzipped),
/// or a text file listing further specifiers.
#[derive(Debug, Clone)]
pub struct FileLoader {
    max_depth: usize,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self {
            max_depth: MAX_LIST_DEPTH,
        }
    }
}

impl FileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn load_path(
        &self,
        path: &Path,
        depth: usize,
    ) -> std::result::Result<Vec<LoadedXform>, String> {
        let file = resolve_file(path)?;
        let text = read_text(&file)?;

        if typedstream::is_typedstream(&text) {
            let xform = typedstream::parse_xform(&text)?;
            log::debug!("loaded {} from {}", xform.kind(), file.display());
            return Ok(vec![LoadedXform::forward(xform)]);
        }

        if depth >= self.max_depth {
            return Err(format!(
                "transformation lists nested more than {} deep",
                self.max_depth
            ));
        }
        let entries = xform_list::parse_list(&text)?;
        if entries.is_empty() {
            return Err("neither a typedstream nor a list of transformations".into());
        }
        let base = file.parent().unwrap_or_else(|| Path::new("."));
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let nested = base.join(&entry.specifier);
            let loaded = self
                .load_path(&nested, depth + 1)
                .map_err(|reason| format!("{}: {reason}", nested.display()))?;
            out.extend(orient(loaded, entry.inverse));
        }
        log::debug!(
            "loaded {} transformations from list {}",
            out.len(),
            file.display()
        );
        Ok(out)
    }
}

impl Loader for FileLoader {
    fn load(&self, specifier: &str) -> Result<Vec<LoadedXform>> {
        self.load_path(Path::new(specifier), 0)
            .map_err(|reason| Error::load(specifier, reason))
    }
}

fn with_gz_suffix(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".gz");
    PathBuf::from(s)
}

/// Find the file holding the transformation,
/// falling back to a gzipped sibling as CMTK does.
fn resolve_file(path: &Path) -> std::result::Result<PathBuf, String> {
    if path.is_dir() {
        return REGISTRATION_FILES
            .iter()
            .map(|name| path.join(name))
            .find(|p| p.is_file())
            .ok_or_else(|| "directory contains no `registration` file".to_string());
    }
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let gz = with_gz_suffix(path);
    if gz.is_file() {
        return Ok(gz);
    }
    Err("no such file or directory".into())
}

fn read_text(file: &Path) -> std::result::Result<String, String> {
    let bytes = fs::read(file).map_err(|e| e.to_string())?;
    if file.extension().is_some_and(|ext| ext == "gz") {
        let mut text = String::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_string(&mut text)
            .map_err(|e| format!("could not decompress: {e}"))?;
        Ok(text)
    } else {
        String::from_utf8(bytes).map_err(|_| "not a text file".to_string())
    }
}

/// Transformations registered by name, for building chains without touching the file system.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader(HashMap<String, Vec<LoadedXform>>);

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, specifier: impl Into<String>, xform: impl Into<Xform>) {
        self.0
            .insert(specifier.into(), vec![LoadedXform::forward(xform.into())]);
    }

    /// Register a specifier which resolves to several transformations, like a list file.
    pub fn insert_many(&mut self, specifier: impl Into<String>, xforms: Vec<LoadedXform>) {
        self.0.insert(specifier.into(), xforms);
    }
}

impl Loader for MemoryLoader {
    fn load(&self, specifier: &str) -> Result<Vec<LoadedXform>> {
        self.0
            .get(specifier)
            .cloned()
            .ok_or_else(|| Error::load(specifier, "no transformation registered under this name"))
    }
}

/// Load a specifier which must hold exactly one affine transformation.
pub fn affine_from_path<L: Loader>(specifier: &str, loader: &L) -> Result<Affine> {
    let mut loaded = loader.load(specifier)?;
    match (loaded.pop(), loaded.is_empty()) {
        (
            Some(LoadedXform {
                xform: Xform::Affine(affine),
                inverse,
            }),
            true,
        ) => {
            if inverse {
                affine.try_invert()
            } else {
                Ok(affine)
            }
        }
        _ => Err(Error::load(specifier, "not a single affine transformation")),
    }
}

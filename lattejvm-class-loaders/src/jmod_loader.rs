//! Bootstrap loader backed by a JDK module archive (`.jmod`).
//!
//! A jmod is a zip file preceded by a 4-byte `JM` header that must be
//! skipped before zip parsing. Class entries live under
//! `classes/<slash-separated-name>.class`.

use std::{collections::HashMap, io::Cursor, io::Read, path::PathBuf, rc::Rc};

use lattejvm_base::ClassFile;
use zip::ZipArchive;

use crate::{ClassLoader, LoadClassError};

const JMOD_HEADER_LEN: usize = 4;

pub struct JmodClassLoader {
    jmod_path: PathBuf,
    cache: HashMap<String, Rc<ClassFile>>,
    /// Populated on first load; the archive bytes stay memory-resident for
    /// the VM's lifetime.
    archive: Option<ZipArchive<Cursor<Vec<u8>>>>,
}

impl JmodClassLoader {
    #[must_use]
    pub fn new(jmod_path: PathBuf) -> JmodClassLoader {
        JmodClassLoader {
            jmod_path,
            cache: HashMap::new(),
            archive: None,
        }
    }

    fn ensure_archive(&mut self) -> Result<&mut ZipArchive<Cursor<Vec<u8>>>, LoadClassError> {
        if self.archive.is_none() {
            let data = std::fs::read(&self.jmod_path)?;
            let zip_data = data
                .get(JMOD_HEADER_LEN..)
                .ok_or(LoadClassError::Zip(zip::result::ZipError::InvalidArchive(
                    "jmod file shorter than its header",
                )))?
                .to_vec();
            tracing::debug!(
                "opened module archive {} ({} bytes)",
                self.jmod_path.display(),
                data.len()
            );
            self.archive = Some(ZipArchive::new(Cursor::new(zip_data)).map_err(LoadClassError::Zip)?);
        }
        match self.archive.as_mut() {
            Some(archive) => Ok(archive),
            // Just populated above.
            None => unreachable!(),
        }
    }
}

impl ClassLoader for JmodClassLoader {
    fn load_class(&mut self, name: &str) -> Result<Rc<ClassFile>, LoadClassError> {
        if let Some(cf) = self.cache.get(name) {
            return Ok(Rc::clone(cf));
        }

        let target = format!("classes/{name}.class");
        let archive = self.ensure_archive()?;

        let mut entry = match archive.by_name(&target) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(LoadClassError::NotFound(name.to_owned()));
            }
            Err(err) => return Err(LoadClassError::Zip(err)),
        };

        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut data)?;
        drop(entry);

        let cf = Rc::new(lattejvm_base::parse(&data)?);
        self.cache.insert(name.to_owned(), Rc::clone(&cf));
        Ok(cf)
    }
}

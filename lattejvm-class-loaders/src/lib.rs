#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

use std::{collections::HashMap, io, path::PathBuf, rc::Rc};

use lattejvm_base::{ClassFile, ClassParseError};

pub mod jmod_loader;

pub use jmod_loader::JmodClassLoader;

#[derive(Debug)]
pub enum LoadClassError {
    /// No backend knows the class. Callers may fall back on this and only
    /// this variant.
    NotFound(String),
    Io(io::Error),
    Zip(zip::result::ZipError),
    Parse(ClassParseError),
}

impl From<io::Error> for LoadClassError {
    fn from(err: io::Error) -> Self {
        LoadClassError::Io(err)
    }
}

impl From<ClassParseError> for LoadClassError {
    fn from(err: ClassParseError) -> Self {
        LoadClassError::Parse(err)
    }
}

/// Loads parsed class files by fully-qualified slash-separated name
/// (e.g. `java/util/HashMap`).
///
/// Implementations cache; two loads of the same name return the same
/// `Rc<ClassFile>`.
pub trait ClassLoader {
    fn load_class(&mut self, name: &str) -> Result<Rc<ClassFile>, LoadClassError>;
}

/// Loads user classes from a classpath directory, delegating to a parent
/// loader first.
pub struct DirectoryClassLoader {
    class_path: PathBuf,
    parent: Box<dyn ClassLoader>,
    cache: HashMap<String, Rc<ClassFile>>,
}

impl DirectoryClassLoader {
    #[must_use]
    pub fn new(class_path: PathBuf, parent: Box<dyn ClassLoader>) -> DirectoryClassLoader {
        DirectoryClassLoader {
            class_path,
            parent,
            cache: HashMap::new(),
        }
    }
}

impl ClassLoader for DirectoryClassLoader {
    fn load_class(&mut self, name: &str) -> Result<Rc<ClassFile>, LoadClassError> {
        if let Some(cf) = self.cache.get(name) {
            return Ok(Rc::clone(cf));
        }

        match self.parent.load_class(name) {
            Ok(cf) => return Ok(cf),
            Err(LoadClassError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }

        let mut path = self.class_path.clone();
        for part in name.split('/') {
            path.push(part);
        }
        path.set_extension("class");

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoadClassError::NotFound(name.to_owned()));
            }
            Err(err) => return Err(LoadClassError::Io(err)),
        };

        tracing::debug!("loading user class {} from {}", name, path.display());
        let cf = Rc::new(lattejvm_base::parse(&data)?);
        self.cache.insert(name.to_owned(), Rc::clone(&cf));
        Ok(cf)
    }
}

//! Synced content handle
//!
//! At most one [`ContentStream`] is open per element. Packaged content is
//! read and written in place; other content is buffered, and every write
//! on the buffer is stored back in the backend before returning.

use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::backend::StorageError;
use crate::content::{data, info, packaged_path, reject_empty, reject_open, storage, Storage};
use crate::element::Element;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

enum Body {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

pub struct ContentStream {
    element: Element,
    body: Body,
    writable: bool,
}

pub(crate) fn open(element: &Element, mode: OpenMode) -> Result<ContentStream> {
    let current = info(element)?;
    reject_empty(element, &current)?;
    reject_open(element)?;
    let package = element.live_package()?;
    let writable = mode == OpenMode::ReadWrite;

    let body = match storage(&current.url) {
        Storage::External(url) if writable => {
            return Err(Error::model(format!(
                "external content of {:?} ({}) is read-only",
                element, url
            )))
        }
        Storage::Packaged(relative) => {
            let path = packaged_path(&package, &relative)?;
            let file = OpenOptions::new()
                .read(true)
                .write(writable)
                .create(writable)
                .open(&path)
                .map_err(|e| StorageError::from_io(e, path))?;
            Body::File(file)
        }
        _ => Body::Memory(Cursor::new(data(element)?)),
    };

    element.0.stream_open.set(true);
    Ok(ContentStream {
        element: element.clone(),
        body,
        writable,
    })
}

impl ContentStream {
    pub fn element(&self) -> &Element {
        &self.element
    }

    fn store(&self, data: &[u8]) -> io::Result<()> {
        let package = self
            .element
            .live_package()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        package
            .backend()
            .update_content_data(package.pid(), &self.element.id(), data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            Body::Memory(cursor) => cursor.read(buf),
            Body::File(file) => file.read(buf),
        }
    }
}

impl Write for ContentStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "content opened read-only",
            ));
        }
        match &mut self.body {
            Body::File(file) => file.write(buf),
            Body::Memory(cursor) => {
                let written = cursor.write(buf)?;
                let data = cursor.get_ref().clone();
                self.store(&data)?;
                Ok(written)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.body {
            Body::File(file) => file.flush(),
            Body::Memory(_) => Ok(()),
        }
    }
}

impl Seek for ContentStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.body {
            Body::Memory(cursor) => cursor.seek(pos),
            Body::File(file) => file.seek(pos),
        }
    }
}

impl Drop for ContentStream {
    fn drop(&mut self) {
        self.element.0.stream_open.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::content::WithContent;
    use crate::package::Package;
    use crate::registry::Registry;
    use tempfile::TempDir;

    #[test]
    fn test_writes_are_stored_immediately() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&Registry::new(Config::with_data_dir(temp.path())))
            .unwrap();
        let v = p.create_view("v", "text/plain").unwrap();
        v.set_content_text("hello world").unwrap();

        let mut stream = v.open_content(OpenMode::ReadWrite).unwrap();
        stream.seek(SeekFrom::Start(6)).unwrap();
        stream.write_all(b"there").unwrap();
        assert_eq!(
            p.backend().get_content_data(p.pid(), "v").unwrap(),
            b"hello there".to_vec()
        );

        assert!(v.open_content(OpenMode::Read).is_err());
        assert!(matches!(v.set_content_text("x"), Err(Error::Model(_))));
        drop(stream);

        let mut text = String::new();
        v.open_content(OpenMode::Read)
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "hello there");
    }

    #[test]
    fn test_read_only_stream() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&Registry::new(Config::with_data_dir(temp.path())))
            .unwrap();
        let v = p.create_view("v", "text/plain").unwrap();
        let mut stream = v.open_content(OpenMode::Read).unwrap();
        let err = stream.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_packaged_stream_writes_file() {
        let temp = TempDir::new().unwrap();
        let p = Package::create_transient(&Registry::new(Config::with_data_dir(temp.path())))
            .unwrap();
        let res = p.create_resource("img", "image/png").unwrap();
        res.set_content_data(b"abc").unwrap();
        assert_eq!(res.content_url().unwrap(), "packaged:/data/img");

        {
            let mut stream = res.open_content(OpenMode::ReadWrite).unwrap();
            stream.seek(SeekFrom::End(0)).unwrap();
            stream.write_all(b"def").unwrap();
        }
        assert_eq!(res.content_data().unwrap(), b"abcdef".to_vec());
    }
}

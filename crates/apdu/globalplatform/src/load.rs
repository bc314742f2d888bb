//! CAP files and LOAD command streaming
//!
//! A CAP file is a ZIP archive of JCVM components. For loading, the
//! components are concatenated in installation order, wrapped as a C4
//! load-file-data block, and cut into LOAD-sized pieces.

use std::io::{Cursor, Read, Seek};
use std::path::Path;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::aid::Aid;
use crate::{Error, Result};

/// Default LOAD block size; fits any secure channel level
pub const DEFAULT_BLOCK_SIZE: usize = 239;

/// JCVM component files in installation order. Descriptor is never part
/// of the load file; Debug only on request.
const COMPONENT_ORDER: &[&str] = &[
    "Header.cap",
    "Directory.cap",
    "Import.cap",
    "Applet.cap",
    "Class.cap",
    "Method.cap",
    "StaticField.cap",
    "Export.cap",
    "ConstantPool.cap",
    "RefLocation.cap",
];

const DEBUG_COMPONENT: &str = "Debug.cap";

/// An opaque source of load blocks
pub trait CapFile {
    /// The package AID from the Header component
    fn package_aid(&self) -> Option<&Aid>;

    /// Total size of the load file data in bytes
    fn code_length(&self, include_debug: bool) -> u32;

    /// The load file cut into LOAD-sized blocks
    fn load_blocks(
        &self,
        include_debug: bool,
        separate_components: bool,
        block_size: usize,
    ) -> Vec<Bytes>;

    /// SHA-1 load-file-data-block hash
    fn load_file_data_hash(&self, include_debug: bool) -> Bytes;
}

/// Summary of a parsed CAP file
#[derive(Debug, Clone)]
pub struct CapFileInfo {
    /// The package AID, when the Header component parses
    pub package_aid: Option<Aid>,
    /// Applet AIDs from the Applet component, in order
    pub applet_aids: Vec<Aid>,
    /// Load file data size without the Debug component
    pub code_length: u32,
}

/// A CAP file read from a ZIP archive
#[derive(Debug)]
pub struct ZipCapFile {
    /// (component file name, contents) in installation order
    components: Vec<(String, Vec<u8>)>,
    debug_component: Option<Vec<u8>>,
    package_aid: Option<Aid>,
    applet_aids: Vec<Aid>,
}

impl ZipCapFile {
    /// Read a CAP file from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// Read a CAP file from an in-memory image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes.to_vec()))
    }

    /// Read a CAP file from any seekable reader
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let mut found: Vec<(String, Vec<u8>)> = Vec::new();
        let mut debug_component = None;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_owned();
            // components may sit under <package>/javacard/
            let Some(file_name) = name.rsplit('/').next().map(str::to_owned) else {
                continue;
            };
            if COMPONENT_ORDER.contains(&file_name.as_str()) {
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut contents)?;
                found.push((file_name, contents));
            } else if file_name == DEBUG_COMPONENT {
                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut contents)?;
                debug_component = Some(contents);
            }
        }

        // canonical installation order, not archive order
        let mut components = Vec::with_capacity(found.len());
        for name in COMPONENT_ORDER {
            if let Some(pos) = found.iter().position(|(n, _)| n == name) {
                components.push(found.swap_remove(pos));
            }
        }
        if components.is_empty() {
            return Err(Error::CapFile("no JCVM components in archive"));
        }

        let package_aid = components
            .iter()
            .find(|(n, _)| n == "Header.cap")
            .and_then(|(_, data)| parse_header_aid(data));
        let applet_aids = components
            .iter()
            .find(|(n, _)| n == "Applet.cap")
            .map(|(_, data)| parse_applet_aids(data))
            .transpose()?
            .unwrap_or_default();

        debug!(
            components = components.len(),
            package = package_aid.as_ref().map(ToString::to_string),
            "parsed CAP file"
        );

        Ok(Self {
            components,
            debug_component,
            package_aid,
            applet_aids,
        })
    }

    /// Applet AIDs declared by the Applet component
    pub fn applet_aids(&self) -> &[Aid] {
        &self.applet_aids
    }

    /// Summarize the CAP file
    pub fn info(&self) -> CapFileInfo {
        CapFileInfo {
            package_aid: self.package_aid.clone(),
            applet_aids: self.applet_aids.clone(),
            code_length: self.code_length(false),
        }
    }

    fn code<'a>(&'a self, include_debug: bool) -> Vec<&'a [u8]> {
        let mut segments: Vec<&[u8]> = self
            .components
            .iter()
            .map(|(_, data)| data.as_slice())
            .collect();
        if include_debug {
            if let Some(debug) = &self.debug_component {
                segments.push(debug.as_slice());
            }
        }
        segments
    }
}

impl CapFile for ZipCapFile {
    fn package_aid(&self) -> Option<&Aid> {
        self.package_aid.as_ref()
    }

    fn code_length(&self, include_debug: bool) -> u32 {
        self.code(include_debug).iter().map(|s| s.len() as u32).sum()
    }

    fn load_blocks(
        &self,
        include_debug: bool,
        separate_components: bool,
        block_size: usize,
    ) -> Vec<Bytes> {
        let segments = self.code(include_debug);
        let total: usize = segments.iter().map(|s| s.len()).sum();
        let header = load_file_header(total);

        if separate_components {
            // blocks never span two components; the C4 header travels
            // with the first one
            let mut blocks = Vec::new();
            for (i, segment) in segments.iter().enumerate() {
                let mut piece = if i == 0 { header.clone() } else { Vec::new() };
                piece.extend_from_slice(segment);
                for chunk in piece.chunks(block_size) {
                    blocks.push(Bytes::copy_from_slice(chunk));
                }
            }
            blocks
        } else {
            let mut image = header;
            for segment in segments {
                image.extend_from_slice(segment);
            }
            image
                .chunks(block_size)
                .map(Bytes::copy_from_slice)
                .collect()
        }
    }

    fn load_file_data_hash(&self, include_debug: bool) -> Bytes {
        let mut hasher = Sha1::new();
        for segment in self.code(include_debug) {
            hasher.update(segment);
        }
        Bytes::copy_from_slice(&hasher.finalize())
    }
}

/// The C4 load-file-data-block header with BER-encoded length
fn load_file_header(code_len: usize) -> Vec<u8> {
    let mut header = vec![0xC4];
    if code_len < 0x80 {
        header.push(code_len as u8);
    } else if code_len < 0x100 {
        header.push(0x81);
        header.push(code_len as u8);
    } else {
        header.push(0x82);
        header.extend_from_slice(&(code_len as u16).to_be_bytes());
    }
    header
}

/// The package AID inside the Header component
fn parse_header_aid(header: &[u8]) -> Option<Aid> {
    // tag(1) size(2) magic(4) cap version(2) flags(1) package version(2)
    // aid length(1) aid
    let aid_len = *header.get(13)? as usize;
    let aid = header.get(14..14 + aid_len)?;
    Aid::try_from(aid).ok()
}

/// The applet AIDs inside the Applet component
fn parse_applet_aids(applet: &[u8]) -> Result<Vec<Aid>> {
    // tag(1) size(2) count(1), then per applet: aid length(1), aid,
    // install method offset(2)
    let count = *applet
        .get(3)
        .ok_or(Error::CapFile("truncated Applet component"))? as usize;
    let mut aids = Vec::with_capacity(count);
    let mut offset = 4usize;
    for _ in 0..count {
        let len = *applet
            .get(offset)
            .ok_or(Error::CapFile("truncated applet entry"))? as usize;
        offset += 1;
        let aid = applet
            .get(offset..offset + len)
            .ok_or(Error::CapFile("truncated applet AID"))?;
        aids.push(Aid::try_from(aid)?);
        offset += len + 2;
    }
    Ok(aids)
}

/// Iterator over the LOAD commands of one load file
#[derive(Debug)]
pub struct LoadCommandStream {
    blocks: Vec<Bytes>,
    index: usize,
}

impl LoadCommandStream {
    /// Stream a CAP file with default options
    pub fn from_cap_file<C: CapFile>(cap: &C) -> Self {
        Self::from_blocks(cap.load_blocks(false, false, DEFAULT_BLOCK_SIZE))
    }

    /// Stream a raw load-file image (already concatenated components,
    /// without the C4 header)
    pub fn from_image(image: &[u8], block_size: usize) -> Self {
        let mut data = load_file_header(image.len());
        data.extend_from_slice(image);
        Self::from_blocks(data.chunks(block_size).map(Bytes::copy_from_slice).collect())
    }

    /// Stream pre-cut blocks
    pub const fn from_blocks(blocks: Vec<Bytes>) -> Self {
        Self { blocks, index: 0 }
    }

    /// Whether another block remains
    pub const fn has_next(&self) -> bool {
        self.index < self.blocks.len()
    }

    /// Total number of blocks
    pub const fn blocks_count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the next block to send
    pub const fn current_block(&self) -> usize {
        self.index
    }

    /// The next block as `(is_last, block_number, data)`
    pub fn next_block(&mut self) -> Option<(bool, u8, Bytes)> {
        if self.index >= self.blocks.len() {
            return None;
        }
        let block = self.blocks[self.index].clone();
        let number = self.index as u8;
        self.index += 1;
        Some((self.index == self.blocks.len(), number, block))
    }
}

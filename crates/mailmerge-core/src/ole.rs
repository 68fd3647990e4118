//! Read-only view of an OLE2 compound file
//!
//! Legacy `.xls` workbooks and password protected OOXML files are stored in
//! this container. Only what the readers need is supported: the directory,
//! and reading a stream from the regular or the mini stream.

/// Signature of an OLE2 compound file
pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const HEADER_LEN: usize = 512;
const DIR_ENTRY_LEN: usize = 128;
const MINI_SECTOR_LEN: usize = 64;
/// Sector ids from here on are markers (free, end of chain, ...)
const MAX_REGULAR_SECTOR: u32 = 0xFFFF_FFFA;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const STREAM: u8 = 2;
const ROOT: u8 = 5;

/// One directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    kind: u8,
    start: u32,
    size: u64,
}

impl DirEntry {
    pub fn is_stream(&self) -> bool {
        self.kind == STREAM
    }
}

#[derive(Debug)]
pub struct CompoundFile<'a> {
    bytes: &'a [u8],
    sector_len: usize,
    mini_cutoff: u64,
    fat: Vec<u32>,
    mini_fat: Vec<u32>,
    mini_stream: Vec<u8>,
    entries: Vec<DirEntry>,
}

fn u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(offset..offset + 2)?.try_into().ok()?))
}

fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(offset..offset + 4)?.try_into().ok()?))
}

fn u64_at(bytes: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(bytes.get(offset..offset + 8)?.try_into().ok()?))
}

fn sector_ids(data: &[u8]) -> impl Iterator<Item = u32> + '_ {
    data.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

impl<'a> CompoundFile<'a> {
    /// Parse the header, allocation tables and directory.
    ///
    /// Returns `None` when `bytes` is not a well-formed compound file.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN || !bytes.starts_with(&SIGNATURE) {
            return None;
        }
        let sector_len = match u16_at(bytes, 30)? {
            9 => 512,
            12 => 4096,
            _ => return None,
        };

        let mut file = CompoundFile {
            bytes,
            sector_len,
            mini_cutoff: u64::from(u32_at(bytes, 56)?),
            fat: Vec::new(),
            mini_fat: Vec::new(),
            mini_stream: Vec::new(),
            entries: Vec::new(),
        };

        // The header lists the first 109 FAT sectors, further ones are in a
        // chain of DIFAT sectors
        let fat_len = (u32_at(bytes, 44)? as usize).min(bytes.len() / sector_len);
        let mut fat_sectors: Vec<u32> = sector_ids(&bytes[76..HEADER_LEN])
            .filter(|&id| id < MAX_REGULAR_SECTOR)
            .collect();
        let mut difat = u32_at(bytes, 68)?;
        let per_difat = sector_len / 4 - 1;
        for _ in 0..u32_at(bytes, 72)? {
            if difat >= MAX_REGULAR_SECTOR || fat_sectors.len() >= fat_len {
                break;
            }
            let sector = file.sector(difat)?;
            fat_sectors.extend(
                sector_ids(sector)
                    .take(per_difat)
                    .filter(|&id| id < MAX_REGULAR_SECTOR),
            );
            difat = u32_at(sector, per_difat * 4)?;
        }
        fat_sectors.truncate(fat_len);

        let mut fat = Vec::new();
        for id in fat_sectors {
            fat.extend(sector_ids(file.sector(id)?));
        }
        file.fat = fat;

        let directory = file.read_chain(u32_at(bytes, 48)?, None)?;
        file.entries = directory
            .chunks_exact(DIR_ENTRY_LEN)
            .map(|raw| file.dir_entry(raw))
            .collect::<Option<_>>()?;
        file.entries.retain(|e| e.kind != 0);

        let root = file.entries.first()?.clone();
        if root.kind != ROOT {
            return None;
        }
        let mini_fat_start = u32_at(bytes, 60)?;
        if mini_fat_start < MAX_REGULAR_SECTOR {
            file.mini_fat = sector_ids(&file.read_chain(mini_fat_start, None)?).collect();
            file.mini_stream = file.read_chain(root.start, Some(root.size))?;
        }
        Some(file)
    }

    /// All directory entries, the root first
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// True if a stream with this name (any case) exists
    pub fn has_stream(&self, name: &str) -> bool {
        self.find_stream(name).is_some()
    }

    /// Contents of the named stream
    pub fn stream(&self, name: &str) -> Option<Vec<u8>> {
        let entry = self.find_stream(name)?;
        if entry.size < self.mini_cutoff {
            self.read_mini_chain(entry.start, entry.size)
        } else {
            self.read_chain(entry.start, Some(entry.size))
        }
    }

    fn find_stream(&self, name: &str) -> Option<&DirEntry> {
        self.entries
            .iter()
            .find(|e| e.is_stream() && e.name.eq_ignore_ascii_case(name))
    }

    fn dir_entry(&self, raw: &[u8]) -> Option<DirEntry> {
        let name_len = usize::from(u16_at(raw, 64)?).min(64);
        let units: Vec<u16> = raw[..name_len]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        let size = if self.sector_len == 512 {
            u64::from(u32_at(raw, 120)?)
        } else {
            u64_at(raw, 120)?
        };
        Some(DirEntry {
            name: String::from_utf16_lossy(&units),
            kind: raw[66],
            start: u32_at(raw, 116)?,
            size,
        })
    }

    fn sector(&self, id: u32) -> Option<&'a [u8]> {
        let start = (id as usize + 1).checked_mul(self.sector_len)?;
        if start >= self.bytes.len() {
            return None;
        }
        let end = (start + self.sector_len).min(self.bytes.len());
        Some(&self.bytes[start..end])
    }

    fn read_chain(&self, start: u32, size: Option<u64>) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        let mut id = start;
        // A chain can never be longer than the table; a cycle means corruption
        for _ in 0..=self.fat.len() {
            if id == END_OF_CHAIN || id >= MAX_REGULAR_SECTOR {
                break;
            }
            data.extend_from_slice(self.sector(id)?);
            id = *self.fat.get(id as usize)?;
        }
        if id != END_OF_CHAIN && !data.is_empty() && id < MAX_REGULAR_SECTOR {
            return None;
        }
        if let Some(size) = size {
            data.truncate(usize::try_from(size).ok()?);
        }
        Some(data)
    }

    fn read_mini_chain(&self, start: u32, size: u64) -> Option<Vec<u8>> {
        let mut data = Vec::new();
        let mut id = start;
        for _ in 0..=self.mini_fat.len() {
            if id >= MAX_REGULAR_SECTOR {
                break;
            }
            let offset = id as usize * MINI_SECTOR_LEN;
            data.extend_from_slice(self.mini_stream.get(offset..offset + MINI_SECTOR_LEN)?);
            id = *self.mini_fat.get(id as usize)?;
        }
        data.truncate(usize::try_from(size).ok()?);
        Some(data)
    }
}

/// Build a compound file holding `streams` in regular sectors
#[cfg(test)]
pub(crate) fn build(streams: &[(&str, &[u8])]) -> Vec<u8> {
    const SECTOR: usize = 512;
    const NO_STREAM: u32 = 0xFFFF_FFFF;

    let entry = |name: &str, kind: u8, right: u32, child: u32, start: u32, size: usize| {
        let mut raw = vec![0u8; DIR_ENTRY_LEN];
        let units: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        for (i, unit) in units.iter().enumerate() {
            raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw[64..66].copy_from_slice(&((units.len() * 2) as u16).to_le_bytes());
        raw[66] = kind;
        raw[67] = 1;
        raw[68..72].copy_from_slice(&NO_STREAM.to_le_bytes());
        raw[72..76].copy_from_slice(&right.to_le_bytes());
        raw[76..80].copy_from_slice(&child.to_le_bytes());
        raw[116..120].copy_from_slice(&start.to_le_bytes());
        raw[120..124].copy_from_slice(&(size as u32).to_le_bytes());
        raw
    };

    let sectors_for = |len: usize| len.div_ceil(SECTOR).max(1);
    let dir_sectors = sectors_for((streams.len() + 1) * DIR_ENTRY_LEN);
    let mut fat: Vec<u32> = vec![0xFFFF_FFFD];
    let chain = |count: usize, fat: &mut Vec<u32>| -> u32 {
        let first = fat.len() as u32;
        for i in 1..count {
            fat.push(first + i as u32);
        }
        fat.push(END_OF_CHAIN);
        first
    };

    let dir_start = chain(dir_sectors, &mut fat);
    let mut directory = entry("Root Entry", ROOT, NO_STREAM, 1, END_OF_CHAIN, 0);
    let mut body = Vec::new();
    for (i, (name, data)) in streams.iter().enumerate() {
        let start = chain(sectors_for(data.len()), &mut fat);
        let right = if i + 1 < streams.len() { i as u32 + 2 } else { NO_STREAM };
        directory.extend(entry(name, STREAM, right, NO_STREAM, start, data.len()));
        let mut padded = data.to_vec();
        padded.resize(sectors_for(data.len()) * SECTOR, 0);
        body.extend(padded);
    }
    directory.resize(dir_sectors * SECTOR, 0);
    assert!(fat.len() <= SECTOR / 4, "test file too large");
    fat.resize(SECTOR / 4, 0xFFFF_FFFF);

    let mut header = vec![0u8; HEADER_LEN];
    header[..8].copy_from_slice(&SIGNATURE);
    header[24..26].copy_from_slice(&0x3Eu16.to_le_bytes());
    header[26..28].copy_from_slice(&3u16.to_le_bytes());
    header[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    header[30..32].copy_from_slice(&9u16.to_le_bytes());
    header[32..34].copy_from_slice(&6u16.to_le_bytes());
    header[44..48].copy_from_slice(&1u32.to_le_bytes());
    header[48..52].copy_from_slice(&dir_start.to_le_bytes());
    header[56..60].copy_from_slice(&4096u32.to_le_bytes());
    header[60..64].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[68..72].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    for slot in header[76..].chunks_exact_mut(4) {
        slot.copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    }
    header[76..80].copy_from_slice(&0u32.to_le_bytes());

    let mut bytes = header;
    bytes.extend(fat.iter().flat_map(|id| id.to_le_bytes()));
    bytes.extend(directory);
    bytes.extend(body);
    bytes
}

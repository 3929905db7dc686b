//! Shared buffer directory: a forward-linked chain of pages enumerating the
//! grant references of a logically contiguous data buffer.
//!
//! A read/write packet can carry at most [`MAX_INLINE_GREFS`] references
//! inline; larger buffers are described by directory pages, each holding a
//! `next` reference (0 terminates the chain) and a count-prefixed reference
//! list.

use bytes::{Buf, BufMut};

use crate::constants::{DIRECTORY_MAX_HOPS, GREFS_PER_DIRECTORY_PAGE, MAX_INLINE_GREFS, PAGE_SIZE};
use crate::error::{Result, SndError};
use crate::packet::{pages_for, BufferRefs};

/// Opaque reference to a shared page, resolved by a [`PageMapper`].
pub type GrantRef = u32;

/// Chain terminator and "no reference" sentinel.
pub const GRANT_REF_INVALID: GrantRef = 0;

/// Allocates shared pages and hands out references to them. The submitter
/// side of a transfer owns the allocation.
pub trait PageAllocator {
    fn alloc_page(&mut self) -> GrantRef;

    /// Writes the contents of a page this allocator handed out.
    fn write_page(&mut self, gref: GrantRef, data: &[u8]);
}

/// Maps a peer's reference into a readable view of the page. Views are
/// borrowed for the duration of servicing a single request; dropping the
/// view unmaps it.
pub trait PageMapper {
    type Page: std::ops::Deref<Target = [u8]>;

    fn map_page(&mut self, gref: GrantRef) -> Option<Self::Page>;
}

/// Writable access to a peer page, used by the backend to fill capture
/// buffers and volume pages. Returns `false` when the reference is dangling.
pub trait PageWriter {
    fn write_into(&mut self, gref: GrantRef, offset: usize, data: &[u8]) -> bool;
}

/// Directory page layout parameters. The per-page reference capacity is a
/// parameter so tests can exercise chaining without 1022-reference pages.
#[derive(Debug, Clone, Copy)]
pub struct DirectoryLayout {
    pub grefs_per_page: usize,
}

impl Default for DirectoryLayout {
    fn default() -> Self {
        Self {
            grefs_per_page: GREFS_PER_DIRECTORY_PAGE,
        }
    }
}

/// Decoded contents of one directory page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPage {
    pub next: GrantRef,
    pub grefs: Vec<GrantRef>,
}

impl DirectoryPage {
    pub fn encode(&self) -> Vec<u8> {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut buf = &mut page[..];
        buf.put_u32_le(self.next);
        buf.put_u32_le(self.grefs.len() as u32);
        for gref in &self.grefs {
            buf.put_u32_le(*gref);
        }
        page
    }

    pub fn decode(page: &[u8], layout: DirectoryLayout) -> Self {
        let mut buf = page;
        let next = buf.get_u32_le();
        let num = (buf.get_u32_le() as usize).min(layout.grefs_per_page);
        let grefs = (0..num).map(|_| buf.get_u32_le()).collect();
        Self { next, grefs }
    }
}

/// A described shared buffer: the data pages, plus the directory chain when
/// the buffer is too large for inline packet references.
///
/// The buffer and every page it references stay owned by the side that built
/// it until the matching response has been observed.
#[derive(Debug, Clone)]
pub struct DescribedBuffer {
    pub length: u32,
    pub data_grefs: Vec<GrantRef>,
    pub dir_grefs: Vec<GrantRef>,
}

impl DescribedBuffer {
    /// References to place in a read/write packet: the data references
    /// themselves when they fit inline, otherwise the directory head.
    pub fn packet_refs(&self) -> BufferRefs {
        if self.data_grefs.len() <= MAX_INLINE_GREFS {
            BufferRefs::Inline(self.data_grefs.clone())
        } else {
            BufferRefs::Directory(self.dir_grefs[0])
        }
    }
}

/// Allocates and describes a buffer of `byte_length` bytes: the data pages,
/// and the minimum chain of directory pages when inline references do not
/// suffice.
pub fn describe(
    byte_length: u32,
    allocator: &mut impl PageAllocator,
    layout: DirectoryLayout,
) -> DescribedBuffer {
    let n_pages = pages_for(byte_length);
    let data_grefs: Vec<GrantRef> = (0..n_pages).map(|_| allocator.alloc_page()).collect();

    let mut dir_grefs = Vec::new();
    if n_pages > MAX_INLINE_GREFS {
        let n_dir = n_pages.div_ceil(layout.grefs_per_page);
        dir_grefs = (0..n_dir).map(|_| allocator.alloc_page()).collect();

        for (i, chunk) in data_grefs.chunks(layout.grefs_per_page).enumerate() {
            let page = DirectoryPage {
                next: dir_grefs.get(i + 1).copied().unwrap_or(GRANT_REF_INVALID),
                grefs: chunk.to_vec(),
            };
            allocator.write_page(dir_grefs[i], &page.encode());
        }
    }

    DescribedBuffer {
        length: byte_length,
        data_grefs,
        dir_grefs,
    }
}

/// Resolves the references of a read/write request into the ordered list of
/// data-page references, walking a directory chain when the packet carries
/// one.
///
/// The walk is iterative and bounded by [`DIRECTORY_MAX_HOPS`] so a cyclic
/// `next` cannot hang the backend. Fails with `DanglingReference` when a
/// directory page cannot be mapped or the chain ends short of `n_pages`;
/// the caller turns that into an Error status on the request rather than a
/// dead connection.
pub fn resolve_refs<M: PageMapper>(
    refs: &BufferRefs,
    n_pages: usize,
    mapper: &mut M,
    layout: DirectoryLayout,
) -> Result<Vec<GrantRef>> {
    let data_grefs: Vec<GrantRef> = match refs {
        BufferRefs::Inline(grefs) => grefs.clone(),
        BufferRefs::Directory(head) => {
            let mut grefs = Vec::with_capacity(n_pages);
            let mut next = *head;
            let mut hops = 0;
            while next != GRANT_REF_INVALID && grefs.len() < n_pages {
                if hops >= DIRECTORY_MAX_HOPS {
                    return Err(SndError::DirectoryLoop(hops));
                }
                hops += 1;
                let page = mapper
                    .map_page(next)
                    .ok_or(SndError::DanglingReference(next))?;
                let dir = DirectoryPage::decode(&page, layout);
                grefs.extend_from_slice(&dir.grefs);
                next = dir.next;
            }
            grefs.truncate(n_pages);
            grefs
        }
    };

    if data_grefs.len() < n_pages {
        return Err(SndError::DanglingReference(GRANT_REF_INVALID));
    }
    Ok(data_grefs)
}

/// Resolves the references of a read/write request into mapped page views,
/// in buffer order. See [`resolve_refs`] for failure semantics.
pub fn resolve<M: PageMapper>(
    refs: &BufferRefs,
    n_pages: usize,
    mapper: &mut M,
    layout: DirectoryLayout,
) -> Result<Vec<M::Page>> {
    let data_grefs = resolve_refs(refs, n_pages, mapper, layout)?;
    let mut pages = Vec::with_capacity(n_pages);
    for gref in &data_grefs {
        pages.push(
            mapper
                .map_page(*gref)
                .ok_or(SndError::DanglingReference(*gref))?,
        );
    }
    Ok(pages)
}

/// In-memory model of the page-sharing primitive: allocator, mapper and
/// writer in one. Backs unit tests and loopback setups; a real deployment
/// substitutes the platform's grant table.
#[derive(Debug, Default)]
pub struct PageStore {
    pages: std::collections::HashMap<GrantRef, std::sync::Arc<Vec<u8>>>,
    next_ref: GrantRef,
}

/// Mapped view handed out by [`PageStore`]; dropping it models unmap.
#[derive(Debug, Clone)]
pub struct StorePage(std::sync::Arc<Vec<u8>>);

impl std::ops::Deref for StorePage {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl PageStore {
    pub fn new() -> Self {
        Self {
            pages: std::collections::HashMap::new(),
            next_ref: 1,
        }
    }

    /// Revokes a page, turning its reference dangling.
    pub fn drop_page(&mut self, gref: GrantRef) {
        self.pages.remove(&gref);
    }
}

impl PageAllocator for PageStore {
    fn alloc_page(&mut self) -> GrantRef {
        let gref = self.next_ref;
        self.next_ref += 1;
        self.pages
            .insert(gref, std::sync::Arc::new(vec![0u8; PAGE_SIZE]));
        gref
    }

    fn write_page(&mut self, gref: GrantRef, data: &[u8]) {
        self.pages.insert(gref, std::sync::Arc::new(data.to_vec()));
    }
}

impl PageMapper for PageStore {
    type Page = StorePage;

    fn map_page(&mut self, gref: GrantRef) -> Option<StorePage> {
        self.pages.get(&gref).cloned().map(StorePage)
    }
}

impl PageWriter for PageStore {
    fn write_into(&mut self, gref: GrantRef, offset: usize, data: &[u8]) -> bool {
        match self.pages.get_mut(&gref) {
            Some(page) if offset + data.len() <= page.len() => {
                std::sync::Arc::make_mut(page)[offset..offset + data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }
}

//! Serialization of a placed container
//!
//! The writer is deliberately dumb: every data item was already encoded by
//! the placement pass, so all that happens here is emitting the header and
//! the fixed-width id sections, then laying the data items down at exactly
//! the offsets the layout assigned them. Any disagreement between the two
//! is an internal invariant breach, reported as `OverlappingAllocation`
//! rather than papered over with padding.
//!
//! The checksum and signature cover the file tail, so they are patched into
//! the header after everything else is in place: the SHA-1 signature hashes
//! everything past the signature field, and the Adler-32 checksum covers
//! everything past the checksum field (the signature included).

use crate::dex::container::DexContainer;
use crate::dex::errors::FormatViolation;
use crate::dex::layout::{DexLayout, ENDIAN_TAG, HEADER_SIZE, MAGIC, NO_INDEX};
use crate::dex::Error;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use sha1::{Digest, Sha1};

const CHECKSUM_RANGE_START: usize = 12;
const SIGNATURE_RANGE_START: usize = 32;

fn index16(index: u32) -> Result<u16, Error> {
    u16::try_from(index)
        .map_err(|_| FormatViolation::ReferenceOutOfRange { index, bits: 16 }.into())
}

pub(crate) fn write_container(
    container: &DexContainer,
    layout: &DexLayout,
) -> Result<Vec<u8>, Error> {
    let pools = container.pools();
    if layout.pools_version != pools.version() {
        return Err(Error::UnplacedContainer);
    }

    let mut bytes: Vec<u8> = Vec::with_capacity(layout.file_size as usize);
    bytes.extend_from_slice(&MAGIC);
    bytes.write_u32::<LittleEndian>(0)?; // checksum, patched below
    bytes.extend_from_slice(&[0u8; 20]); // signature, patched below
    bytes.write_u32::<LittleEndian>(layout.file_size)?;
    bytes.write_u32::<LittleEndian>(HEADER_SIZE)?;
    bytes.write_u32::<LittleEndian>(ENDIAN_TAG)?;
    bytes.write_u32::<LittleEndian>(0)?; // link_size
    bytes.write_u32::<LittleEndian>(0)?; // link_off
    bytes.write_u32::<LittleEndian>(layout.map_off)?;
    bytes.write_u32::<LittleEndian>(pools.string_count())?;
    bytes.write_u32::<LittleEndian>(layout.string_ids_off)?;
    bytes.write_u32::<LittleEndian>(pools.type_count())?;
    bytes.write_u32::<LittleEndian>(layout.type_ids_off)?;
    bytes.write_u32::<LittleEndian>(pools.proto_count())?;
    bytes.write_u32::<LittleEndian>(layout.proto_ids_off)?;
    bytes.write_u32::<LittleEndian>(pools.field_count())?;
    bytes.write_u32::<LittleEndian>(layout.field_ids_off)?;
    bytes.write_u32::<LittleEndian>(pools.method_count())?;
    bytes.write_u32::<LittleEndian>(layout.method_ids_off)?;
    bytes.write_u32::<LittleEndian>(container.classes().len() as u32)?;
    bytes.write_u32::<LittleEndian>(layout.class_defs_off)?;
    bytes.write_u32::<LittleEndian>(layout.file_size - layout.data_off)?;
    bytes.write_u32::<LittleEndian>(layout.data_off)?;
    debug_assert_eq!(bytes.len() as u32, HEADER_SIZE);

    for handle in &layout.string_order {
        bytes.write_u32::<LittleEndian>(layout.string_data_offsets[handle.0 as usize])?;
    }

    for handle in &layout.type_order {
        bytes.write_u32::<LittleEndian>(layout.string_index(pools.type_string(*handle)))?;
    }

    for handle in &layout.proto_order {
        let data = pools.proto(*handle);
        bytes.write_u32::<LittleEndian>(layout.string_index(data.shorty))?;
        bytes.write_u32::<LittleEndian>(layout.type_index(data.return_type))?;
        let parameters_off = match data.parameters {
            None => 0,
            Some(list) => layout.type_list_offsets[list.0 as usize],
        };
        bytes.write_u32::<LittleEndian>(parameters_off)?;
    }

    for handle in &layout.field_order {
        let data = pools.field(*handle);
        bytes.write_u16::<LittleEndian>(index16(layout.type_index(data.class))?)?;
        bytes.write_u16::<LittleEndian>(index16(layout.type_index(data.ty))?)?;
        bytes.write_u32::<LittleEndian>(layout.string_index(data.name))?;
    }

    for handle in &layout.method_order {
        let data = pools.method(*handle);
        bytes.write_u16::<LittleEndian>(index16(layout.type_index(data.class))?)?;
        bytes.write_u16::<LittleEndian>(index16(layout.proto_index(data.proto))?)?;
        bytes.write_u32::<LittleEndian>(layout.string_index(data.name))?;
    }

    for &position in &layout.class_order {
        let class = &container.classes()[position];
        let class_layout = &layout.classes[position];
        bytes.write_u32::<LittleEndian>(layout.type_index(class.class))?;
        bytes.write_u32::<LittleEndian>(class.access_flags.bits())?;
        bytes.write_u32::<LittleEndian>(match class.superclass {
            Some(superclass) => layout.type_index(superclass),
            None => NO_INDEX,
        })?;
        bytes.write_u32::<LittleEndian>(match class.interfaces {
            Some(interfaces) => layout.type_list_offsets[interfaces.0 as usize],
            None => 0,
        })?;
        bytes.write_u32::<LittleEndian>(match class.source_file {
            Some(file) => layout.string_index(file),
            None => NO_INDEX,
        })?;
        bytes.write_u32::<LittleEndian>(class_layout.annotations_off)?;
        bytes.write_u32::<LittleEndian>(class_layout.class_data_off)?;
        bytes.write_u32::<LittleEndian>(0)?; // static_values_off
    }

    for (allocation, data) in layout.allocations().iter().zip(&layout.data_bytes) {
        let position = bytes.len() as u32;
        if position > allocation.offset || data.len() as u32 != allocation.size {
            return Err(Error::OverlappingAllocation {
                offset: allocation.offset,
                previous_end: position,
            });
        }
        bytes.resize(allocation.offset as usize, 0);
        bytes.extend_from_slice(data);
    }

    if bytes.len() as u32 != layout.file_size {
        return Err(Error::OverlappingAllocation {
            offset: layout.file_size,
            previous_end: bytes.len() as u32,
        });
    }

    let signature = Sha1::digest(&bytes[SIGNATURE_RANGE_START..]);
    bytes[CHECKSUM_RANGE_START..SIGNATURE_RANGE_START].copy_from_slice(&signature);
    let checksum = crate::util::adler32(&bytes[CHECKSUM_RANGE_START..]);
    LittleEndian::write_u32(&mut bytes[8..CHECKSUM_RANGE_START], checksum);

    Ok(bytes)
}

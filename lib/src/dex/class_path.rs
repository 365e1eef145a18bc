//! Instance-field layout over a set of loaded classes
//!
//! Given the class definitions of one or more containers, this module
//! assigns every instance field the byte offset the target runtime's linker
//! would give it. Layout is versioned: the runtime changed its gap-filling
//! strategy at version 67, and both behaviours are reproduced bit-for-bit
//! since consumers match offsets against linked images.
//!
//! Classes live in an arena and are looked up by descriptor through a
//! frozen map, so nodes can reference each other without ownership cycles;
//! computed layouts are memoized the same way.

use crate::dex::container::DexContainer;
use crate::dex::descriptors;
use crate::dex::Error;
use elsa::map::FrozenMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use typed_arena::Arena;

/// Bytes of object header preceding the first instance field
pub const OBJECT_BASE: u32 = 8;

/// First layout version that fills the largest gap first
pub const LARGEST_GAP_FIRST_VERSION: u32 = 67;

pub struct ClassPathArena {
    classes: Arena<ClassNode>,
}

impl ClassPathArena {
    pub fn new() -> ClassPathArena {
        ClassPathArena {
            classes: Arena::new(),
        }
    }
}

/// One loaded class, reduced to what field layout needs
#[derive(Clone, Debug)]
pub struct ClassNode {
    pub descriptor: String,
    pub superclass: Option<String>,
    pub instance_fields: Vec<ClassPathField>,
}

#[derive(Clone, Debug)]
pub struct ClassPathField {
    pub name: String,
    pub descriptor: String,
}

/// A field at its final byte offset within the object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedField {
    pub offset: u32,
    pub name: String,
    pub descriptor: String,
}

/// The memoized result for one class: all its fields (inherited included)
/// sorted by offset, plus the offset its subclasses start at
struct LinkedLayout {
    fields: Vec<LinkedField>,
    end: u32,
}

/// An unused hole left behind by alignment, fillable by a later smaller
/// field. Which hole gets filled first is what changed at version 67, so
/// the heap order depends on it: pop the largest gap (ties: lowest offset)
/// from 67 on, the smallest gap (ties: highest offset) before.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct FieldGap {
    offset: u32,
    size: u32,
    largest_first: bool,
}

impl Ord for FieldGap {
    fn cmp(&self, other: &FieldGap) -> Ordering {
        // The heap pops its maximum, so "fill me next" must compare greatest
        if self.largest_first {
            self.size
                .cmp(&other.size)
                .then(other.offset.cmp(&self.offset))
        } else {
            other
                .size
                .cmp(&self.size)
                .then(self.offset.cmp(&other.offset))
        }
    }
}

impl PartialOrd for FieldGap {
    fn partial_cmp(&self, other: &FieldGap) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn add_field_gap(gap_start: u32, gap_end: u32, gaps: &mut BinaryHeap<FieldGap>, largest_first: bool) {
    let mut offset = gap_start;
    while offset < gap_end {
        let remaining = gap_end - offset;
        let size = if remaining >= 4 && offset % 4 == 0 {
            4
        } else if remaining >= 2 && offset % 2 == 0 {
            2
        } else {
            1
        };
        gaps.push(FieldGap {
            offset,
            size,
            largest_first,
        });
        offset += size;
    }
}

/// Sort precedence of a field type: references first, then by descending
/// size with a fixed order among same-sized primitives
fn field_sort_order(descriptor: &str) -> u32 {
    match descriptor.as_bytes()[0] {
        b'[' | b'L' => 0,
        b'J' => 1,
        b'D' => 2,
        b'I' => 3,
        b'F' => 4,
        b'C' => 5,
        b'S' => 6,
        b'Z' => 7,
        _ => 8,
    }
}

pub struct ClassPath<'p> {
    arena: &'p ClassPathArena,
    classes: FrozenMap<String, &'p ClassNode>,
    layouts: FrozenMap<String, Box<LinkedLayout>>,
    layout_version: u32,
}

impl<'p> ClassPath<'p> {
    pub fn new(arena: &'p ClassPathArena, layout_version: u32) -> ClassPath<'p> {
        ClassPath {
            arena,
            classes: FrozenMap::new(),
            layouts: FrozenMap::new(),
            layout_version,
        }
    }

    pub fn layout_version(&self) -> u32 {
        self.layout_version
    }

    pub fn add_class(&self, node: ClassNode) -> &'p ClassNode {
        let node = &*self.arena.classes.alloc(node);
        self.classes.insert(node.descriptor.clone(), node);
        node
    }

    /// Load every class definition of a container
    pub fn add_container(&self, container: &DexContainer) {
        let pools = container.pools();
        for class in container.classes() {
            let instance_fields = class
                .instance_fields
                .iter()
                .map(|field| {
                    let data = pools.field(field.field);
                    ClassPathField {
                        name: pools.string(data.name).to_string(),
                        descriptor: pools.type_descriptor(data.ty).to_string(),
                    }
                })
                .collect();
            self.add_class(ClassNode {
                descriptor: pools.type_descriptor(class.class).to_string(),
                superclass: class
                    .superclass
                    .map(|superclass| pools.type_descriptor(superclass).to_string()),
                instance_fields,
            });
        }
    }

    pub fn get_class(&self, descriptor: &str) -> Option<&ClassNode> {
        self.classes.get(descriptor)
    }

    /// Every instance field of `descriptor`, inherited ones included, at
    /// its linked offset, sorted by offset
    ///
    /// A class not present in the path is treated as fieldless; its
    /// subclasses start right after the object header.
    pub fn instance_fields(&self, descriptor: &str) -> Result<&[LinkedField], Error> {
        Ok(&self.layout(descriptor, &mut vec![])?.fields)
    }

    /// The field of `descriptor` linked at exactly `offset`, if any
    pub fn field_at_offset(
        &self,
        descriptor: &str,
        offset: u32,
    ) -> Result<Option<&LinkedField>, Error> {
        Ok(self
            .instance_fields(descriptor)?
            .iter()
            .find(|field| field.offset == offset))
    }

    /// Offset at which a subclass of `descriptor` places its first field
    pub fn next_field_offset(&self, descriptor: &str) -> Result<u32, Error> {
        Ok(self.layout(descriptor, &mut vec![])?.end)
    }

    fn layout(&self, descriptor: &str, visiting: &mut Vec<String>) -> Result<&LinkedLayout, Error> {
        if let Some(layout) = self.layouts.get(descriptor) {
            return Ok(layout);
        }
        if visiting.iter().any(|entry| entry == descriptor) {
            return Err(Error::CircularSuperclasses {
                descriptor: descriptor.to_string(),
            });
        }

        let node = match self.classes.get(descriptor) {
            Some(node) => node,
            None => {
                return Ok(self.layouts.insert(
                    descriptor.to_string(),
                    Box::new(LinkedLayout {
                        fields: vec![],
                        end: OBJECT_BASE,
                    }),
                ));
            }
        };

        let (inherited, start) = match &node.superclass {
            Some(superclass) => {
                visiting.push(descriptor.to_string());
                let parent = self.layout(superclass, visiting)?;
                visiting.pop();
                (parent.fields.clone(), parent.end)
            }
            None => (vec![], OBJECT_BASE),
        };

        let mut fields = node.instance_fields.clone();
        fields.sort_by(|a, b| {
            field_sort_order(&a.descriptor)
                .cmp(&field_sort_order(&b.descriptor))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.descriptor.cmp(&b.descriptor))
        });

        let largest_first = self.layout_version >= LARGEST_GAP_FIRST_VERSION;
        let mut gaps: BinaryHeap<FieldGap> = BinaryHeap::new();
        let mut linked = inherited;
        let mut field_offset = start;

        for field in fields {
            let size = descriptors::field_size(&field.descriptor);
            if field_offset % size != 0 {
                let unaligned = field_offset;
                field_offset = crate::util::align_offset(field_offset, size);
                add_field_gap(unaligned, field_offset, &mut gaps, largest_first);
            }

            let linked_field = |offset: u32| LinkedField {
                offset,
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
            };
            match gaps.peek().copied() {
                Some(gap) if gap.size >= size => {
                    gaps.pop();
                    linked.push(linked_field(gap.offset));
                    if gap.size > size {
                        add_field_gap(gap.offset + size, gap.offset + gap.size, &mut gaps, largest_first);
                    }
                }
                _ => {
                    linked.push(linked_field(field_offset));
                    field_offset += size;
                }
            }
        }

        linked.sort_by_key(|field| field.offset);
        let end = match linked.last() {
            Some(last) => last.offset + descriptors::field_size(&last.descriptor),
            None => start,
        };

        log::debug!(
            "linked {} instance fields of {} (version {}), next offset {}",
            linked.len(),
            descriptor,
            self.layout_version,
            end
        );
        Ok(self.layouts.insert(
            descriptor.to_string(),
            Box::new(LinkedLayout {
                fields: linked,
                end,
            }),
        ))
    }
}

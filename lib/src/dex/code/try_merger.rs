//! Merging overlapping handler declarations into disjoint try blocks
//!
//! Handlers are declared independently per catch clause and may overlap
//! arbitrarily. The container format instead wants a sorted list of disjoint
//! ranges, each with one ordered handler list. Declaration order is
//! semantically load-bearing: the runtime tries handlers in the declared
//! sequence, so the per-range handler lists must preserve it, and where two
//! catch-all declarations cover the same range only the first-declared one
//! survives (the later one is shadowed, mirroring nearest-enclosing-catch
//! semantics).
//!
//! The merge is a boundary sweep: collect the distinct boundary addresses,
//! form a candidate sub-range between each adjacent pair, keep the covered
//! ones, and walk the declarations past each boundary once. This stays
//! `O(n log n)` in the declaration count instead of intersecting intervals
//! pairwise.

use crate::dex::pools::TypeRef;
use crate::dex::Error;
use std::collections::BTreeSet;

/// One raw `catch` declaration, with resolved code-unit addresses
#[derive(Clone, Debug)]
struct RawTry {
    start: u32,
    /// Exclusive
    end: u32,
    /// `None` marks a catch-all
    catch_type: Option<TypeRef>,
    handler: u32,
}

/// A disjoint, encodable try block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryBlock {
    pub start_address: u32,
    pub code_unit_count: u32,
    /// `(type, handler address)` pairs in declaration order
    pub handlers: Vec<(TypeRef, u32)>,
    pub catch_all: Option<u32>,
}

impl TryBlock {
    pub fn end_address(&self) -> u32 {
        self.start_address + self.code_unit_count
    }
}

/// Accumulates raw declarations and merges them on demand
pub struct TryRangeMerger {
    declarations: Vec<RawTry>,
}

impl TryRangeMerger {
    pub fn new() -> TryRangeMerger {
        TryRangeMerger {
            declarations: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declare a typed handler covering `[start, end)`
    pub fn add_handler(
        &mut self,
        catch_type: TypeRef,
        start: u32,
        end: u32,
        handler: u32,
    ) -> Result<(), Error> {
        self.add_declaration(Some(catch_type), start, end, handler)
    }

    /// Declare a catch-all handler covering `[start, end)`
    pub fn add_catch_all(&mut self, start: u32, end: u32, handler: u32) -> Result<(), Error> {
        self.add_declaration(None, start, end, handler)
    }

    fn add_declaration(
        &mut self,
        catch_type: Option<TypeRef>,
        start: u32,
        end: u32,
        handler: u32,
    ) -> Result<(), Error> {
        if end <= start {
            return Err(Error::NonMonotonicAddress {
                previous: start,
                address: end,
            });
        }
        self.declarations.push(RawTry {
            start,
            end,
            catch_type,
            handler,
        });
        Ok(())
    }

    /// Produce the minimal set of disjoint blocks
    pub fn merge(&self) -> Vec<TryBlock> {
        // Sorted distinct boundary addresses across all declarations
        let boundaries: BTreeSet<u32> = self
            .declarations
            .iter()
            .flat_map(|declaration| [declaration.start, declaration.end])
            .collect();
        let boundaries: Vec<u32> = boundaries.into_iter().collect();

        // Sweep: the set of covering declarations (by declaration index, so
        // iteration order is declaration order) changes only at boundaries
        let mut by_start: Vec<usize> = (0..self.declarations.len()).collect();
        by_start.sort_by_key(|index| self.declarations[*index].start);
        let mut by_end: Vec<usize> = (0..self.declarations.len()).collect();
        by_end.sort_by_key(|index| self.declarations[*index].end);
        let (mut next_start, mut next_end) = (0, 0);

        let mut active: BTreeSet<usize> = BTreeSet::new();
        let mut pieces: Vec<(u32, u32, Vec<(Option<TypeRef>, u32)>)> = vec![];

        for window in boundaries.windows(2) {
            let (low, high) = (window[0], window[1]);
            while next_end < by_end.len() && self.declarations[by_end[next_end]].end <= low {
                active.remove(&by_end[next_end]);
                next_end += 1;
            }
            while next_start < by_start.len() && self.declarations[by_start[next_start]].start <= low
            {
                active.insert(by_start[next_start]);
                next_start += 1;
            }

            if active.is_empty() {
                continue;
            }

            // Handlers of every covering declaration, in declaration order
            // and before any shadowing - shadowed entries still distinguish
            // this piece from its neighbours for coalescing purposes
            let covered: Vec<(Option<TypeRef>, u32)> = active
                .iter()
                .map(|index| {
                    let declaration = &self.declarations[*index];
                    (declaration.catch_type, declaration.handler)
                })
                .collect();

            // Coalesce with the previous piece when adjacent and identical
            if let Some(last) = pieces.last_mut() {
                if last.1 == low && last.2 == covered {
                    last.1 = high;
                    continue;
                }
            }
            pieces.push((low, high, covered));
        }

        pieces
            .into_iter()
            .map(|(start, end, covered)| {
                let mut handlers: Vec<(TypeRef, u32)> = vec![];
                let mut catch_all = None;
                for (catch_type, handler) in covered {
                    match catch_type {
                        // First-declared catch-all wins; later ones are shadowed
                        None => {
                            if catch_all.is_none() {
                                catch_all = Some(handler);
                            }
                        }
                        // Likewise the first declaration of a type shadows
                        // any later declaration of the same type
                        Some(ty) => {
                            if !handlers.iter().any(|(existing, _)| *existing == ty) {
                                handlers.push((ty, handler));
                            }
                        }
                    }
                }
                TryBlock {
                    start_address: start,
                    code_unit_count: end - start,
                    handlers,
                    catch_all,
                }
            })
            .collect()
    }
}

impl Default for TryRangeMerger {
    fn default() -> TryRangeMerger {
        TryRangeMerger::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::pools::DexPools;

    fn types(count: usize) -> (DexPools, Vec<TypeRef>) {
        let mut pools = DexPools::new();
        let types = (0..count)
            .map(|index| {
                pools
                    .intern_type(&format!("Ljava/lang/Exception{};", index + 1))
                    .unwrap()
            })
            .collect();
        (pools, types)
    }

    fn check_block(
        block: &TryBlock,
        start: u32,
        end: u32,
        catch_all: Option<u32>,
        handlers: &[(TypeRef, u32)],
    ) {
        assert_eq!(block.start_address, start);
        assert_eq!(block.end_address(), end);
        assert_eq!(block.catch_all, catch_all);
        assert_eq!(block.handlers, handlers);
    }

    #[test]
    fn single_try() {
        let (_, t) = types(1);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 1);
        check_block(&blocks[0], 2, 5, None, &[(t[0], 100)]);
    }

    #[test]
    fn single_try_with_catch_all() {
        let (_, t) = types(1);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();
        merger.add_catch_all(2, 5, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 1);
        check_block(&blocks[0], 2, 5, Some(101), &[(t[0], 100)]);
    }

    #[test]
    fn adjacent_tries_stay_separate() {
        //|-----|
        //      |-----|
        let (_, t) = types(1);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();
        merger.add_handler(t[0], 5, 10, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 2);
        check_block(&blocks[0], 2, 5, None, &[(t[0], 100)]);
        check_block(&blocks[1], 5, 10, None, &[(t[0], 101)]);
    }

    #[test]
    fn disjoint_tries() {
        //|-----|
        //         |-----|
        let (_, t) = types(1);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();
        merger.add_handler(t[0], 10, 15, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 2);
        check_block(&blocks[0], 2, 5, None, &[(t[0], 100)]);
        check_block(&blocks[1], 10, 15, None, &[(t[0], 101)]);
    }

    #[test]
    fn identical_ranges_merge_handler_lists() {
        //|-----|
        //|-----|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();
        merger.add_handler(t[1], 2, 5, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 1);
        check_block(&blocks[0], 2, 5, None, &[(t[0], 100), (t[1], 101)]);
    }

    #[test]
    fn overlap_splits_at_both_boundaries() {
        //|-----|
        //   |-----|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 5, 100).unwrap();
        merger.add_handler(t[1], 4, 10, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 3);
        check_block(&blocks[0], 2, 4, None, &[(t[0], 100)]);
        check_block(&blocks[1], 4, 5, None, &[(t[0], 100), (t[1], 101)]);
        check_block(&blocks[2], 5, 10, None, &[(t[1], 101)]);
    }

    #[test]
    fn overlap_orders_by_declaration_not_position() {
        //   |-----|
        //|-----|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[1], 4, 10, 101).unwrap();
        merger.add_handler(t[0], 2, 5, 100).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 3);
        check_block(&blocks[0], 2, 4, None, &[(t[0], 100)]);
        // The middle range lists the first-declared handler first
        check_block(&blocks[1], 4, 5, None, &[(t[1], 101), (t[0], 100)]);
        check_block(&blocks[2], 5, 10, None, &[(t[1], 101)]);
    }

    #[test]
    fn nested_range_splits_enclosing() {
        //|-----|
        // |---|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 10, 100).unwrap();
        merger.add_handler(t[1], 4, 6, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 3);
        check_block(&blocks[0], 2, 4, None, &[(t[0], 100)]);
        check_block(&blocks[1], 4, 6, None, &[(t[0], 100), (t[1], 101)]);
        check_block(&blocks[2], 6, 10, None, &[(t[0], 100)]);
    }

    #[test]
    fn shared_start_boundary() {
        //|-----|
        //|---|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 10, 100).unwrap();
        merger.add_handler(t[1], 2, 6, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 2);
        check_block(&blocks[0], 2, 6, None, &[(t[0], 100), (t[1], 101)]);
        check_block(&blocks[1], 6, 10, None, &[(t[0], 100)]);
    }

    #[test]
    fn shared_end_boundary() {
        //|-----|
        //  |---|
        let (_, t) = types(2);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 10, 100).unwrap();
        merger.add_handler(t[1], 6, 10, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 2);
        check_block(&blocks[0], 2, 6, None, &[(t[0], 100)]);
        check_block(&blocks[1], 6, 10, None, &[(t[0], 100), (t[1], 101)]);
    }

    #[test]
    fn three_tries_with_enclosing_range() {
        //  |-----|
        //            |-----|
        //|--------------------|
        let (_, t) = types(3);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 2, 4, 100).unwrap();
        merger.add_handler(t[1], 6, 10, 101).unwrap();
        merger.add_handler(t[2], 0, 12, 102).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 5);
        check_block(&blocks[0], 0, 2, None, &[(t[2], 102)]);
        check_block(&blocks[1], 2, 4, None, &[(t[0], 100), (t[2], 102)]);
        check_block(&blocks[2], 4, 6, None, &[(t[2], 102)]);
        check_block(&blocks[3], 6, 10, None, &[(t[1], 101), (t[2], 102)]);
        check_block(&blocks[4], 10, 12, None, &[(t[2], 102)]);
    }

    #[test]
    fn first_declared_catch_all_wins() {
        //|-----|
        // |---|
        let mut merger = TryRangeMerger::new();
        merger.add_catch_all(2, 8, 100).unwrap();
        merger.add_catch_all(4, 6, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 3);
        check_block(&blocks[0], 2, 4, Some(100), &[]);
        check_block(&blocks[1], 4, 6, Some(100), &[]);
        check_block(&blocks[2], 6, 8, Some(100), &[]);
    }

    #[test]
    fn inner_catch_all_keeps_its_range() {
        // |---|
        //|-----|
        let mut merger = TryRangeMerger::new();
        merger.add_catch_all(4, 6, 100).unwrap();
        merger.add_catch_all(2, 8, 101).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 3);
        check_block(&blocks[0], 2, 4, Some(101), &[]);
        check_block(&blocks[1], 4, 6, Some(100), &[]);
        check_block(&blocks[2], 6, 8, Some(101), &[]);
    }

    #[test]
    fn identical_adjacent_pieces_coalesce() {
        // Two abutting declarations of the same type and handler collapse
        // into one block
        let (_, t) = types(1);
        let mut merger = TryRangeMerger::new();
        merger.add_handler(t[0], 0, 5, 100).unwrap();
        merger.add_handler(t[0], 5, 10, 100).unwrap();

        let blocks = merger.merge();
        assert_eq!(blocks.len(), 1);
        check_block(&blocks[0], 0, 10, None, &[(t[0], 100)]);
    }

    #[test]
    fn empty_range_is_rejected() {
        let mut merger = TryRangeMerger::new();
        assert!(merger.add_catch_all(5, 5, 0).is_err());
        assert!(merger.add_catch_all(5, 2, 0).is_err());
    }
}

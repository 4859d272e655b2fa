use std::marker::PhantomData;
use std::sync::Arc;

use crate::communicator::sealed;
use crate::fabric::Fabric;
use crate::{Comm, CommittedRegion, ContiguousRegion, Element, Result};

/// A derived type that describes `count` consecutive values of `T`, not yet usable for
/// communication.
///
/// Call [`commit()`][ContiguousRegion::commit] to obtain a type that can be used with typed
/// sends and receives. Dropping either form frees the type.
#[derive(Debug)]
#[must_use]
pub struct ContiguousType<T: Element> {
    handle: TypeHandle,
    count: usize,
    _element: PhantomData<T>,
}

impl<T: Element> sealed::Backend for ContiguousType<T> {}

impl<T: Element> ContiguousRegion for ContiguousType<T> {
    type Committed = CommittedType<T>;

    fn commit(self) -> Result<CommittedType<T>> {
        Ok(CommittedType {
            handle: self.handle,
            count: self.count,
            _element: PhantomData,
        })
    }
}

/// A committed derived type that describes `count` consecutive values of `T`.
///
/// The type is freed when dropped.
#[derive(Debug)]
#[must_use]
pub struct CommittedType<T: Element> {
    handle: TypeHandle,
    count: usize,
    _element: PhantomData<T>,
}

impl<T: Element> sealed::Backend for CommittedType<T> {}

impl<T: Element> CommittedRegion for CommittedType<T> {
    fn count(&self) -> usize {
        self.count
    }
}

/// Keeps the world's count of live derived types accurate.
#[derive(derive_more::Debug)]
struct TypeHandle {
    #[debug(ignore)]
    fabric: Arc<Fabric>,
}

impl TypeHandle {
    fn new(fabric: Arc<Fabric>) -> Self {
        fabric.datatype_created();
        Self { fabric }
    }
}

impl Drop for TypeHandle {
    fn drop(&mut self) {
        self.fabric.datatype_freed();
    }
}

pub(crate) fn contiguous_type<T: Element>(comm: &Comm, count: usize) -> ContiguousType<T> {
    ContiguousType {
        handle: TypeHandle::new(Arc::clone(comm.fabric())),
        count,
        _element: PhantomData,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::num::NonZero;

    use static_assertions::assert_impl_all;
    use testing::with_watchdog;

    use super::*;
    use crate::{Communicator, Error, World};

    assert_impl_all!(CommittedType<i32>: Send, Sync, Debug);

    fn world(size: usize) -> World {
        World::new(NonZero::new(size).unwrap())
    }

    #[test]
    fn lifecycle_is_counted_across_the_world() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let created = comm.contiguous_type::<i32>(5).unwrap();

                comm.barrier().unwrap();
                assert_eq!(comm.live_datatypes(), 2);
                comm.barrier().unwrap();

                let committed = created.commit().unwrap();
                assert_eq!(committed.count(), 5);

                comm.barrier().unwrap();
                assert_eq!(comm.live_datatypes(), 2);
                comm.barrier().unwrap();

                drop(committed);

                comm.barrier().unwrap();
                assert_eq!(comm.live_datatypes(), 0);
            });
        });
    }

    #[test]
    fn uncommitted_type_is_freed_when_dropped() {
        with_watchdog(|| {
            world(1).run(|comm| {
                drop(comm.contiguous_type::<u8>(3).unwrap());

                assert_eq!(comm.live_datatypes(), 0);
            });
        });
    }

    #[test]
    fn typed_region_transfers_prefix_of_buffer() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let datatype = comm.contiguous_type::<i32>(3).unwrap().commit().unwrap();
                let source = [1, 2, 3, 4];
                let mut buf = [0; 4];

                let mut batch = comm.batch();

                if comm.rank() == 0 {
                    batch.send_typed(&source, &datatype, 1, 2).unwrap();
                } else {
                    batch.receive_typed_into(&mut buf, &datatype, 0, 2).unwrap();
                }

                batch.wait_all().unwrap();

                if comm.rank() == 1 {
                    assert_eq!(buf, [1, 2, 3, 0]);
                }
            });
        });
    }

    #[test]
    fn typed_receives_complete_together() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let pair = comm.contiguous_type::<f64>(2).unwrap().commit().unwrap();
                let single = comm.contiguous_type::<f64>(1).unwrap().commit().unwrap();

                if comm.rank() == 0 {
                    let mut batch = comm.batch();
                    batch.send_typed(&[0.5, 1.5], &pair, 1, 0).unwrap();
                    batch.send_typed(&[2.5], &single, 1, 1).unwrap();
                    batch.wait_all().unwrap();
                } else {
                    let mut first = [0.0; 2];
                    let mut second = [0.0; 1];

                    // Posted in the opposite order of the sends.
                    let mut batch = comm.batch();
                    batch.receive_typed_into(&mut second, &single, 0, 1).unwrap();
                    batch.receive_typed_into(&mut first, &pair, 0, 0).unwrap();
                    batch.wait_all().unwrap();

                    assert_eq!(first, [0.5, 1.5]);
                    assert_eq!(second, [2.5]);
                }
            });
        });
    }

    #[test]
    fn region_larger_than_buffer_is_rejected() {
        with_watchdog(|| {
            world(1).run(|comm| {
                let datatype = comm.contiguous_type::<i32>(3).unwrap().commit().unwrap();
                let short = [1, 2];

                let mut batch = comm.batch();

                assert!(matches!(
                    batch.send_typed(&short, &datatype, 0, 0),
                    Err(Error::RegionExtent { extent: 3, len: 2 })
                ));
            });
        });
    }

    #[test]
    fn short_message_is_count_mismatch() {
        with_watchdog(|| {
            world(2).run(|comm| {
                let datatype = comm.contiguous_type::<i32>(3).unwrap().commit().unwrap();

                if comm.rank() == 0 {
                    comm.send(&[1], 1, 0).unwrap();
                } else {
                    let mut buf = [0; 3];

                    let mut batch = comm.batch();
                    batch.receive_typed_into(&mut buf, &datatype, 0, 0).unwrap();

                    assert!(matches!(
                        batch.wait_all(),
                        Err(Error::CountMismatch {
                            expected: 3,
                            actual: 1
                        })
                    ));
                }
            });
        });
    }
}

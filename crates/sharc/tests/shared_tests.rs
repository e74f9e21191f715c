mod shared {
    use sharc::{Deleter, Shared, Unique, upcast};
    use sharc_test_utils::{LiveCounter, Tracked};
    use std::{
        collections::HashSet,
        fmt::Display,
        ptr::NonNull,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    trait Shape: Send + Sync {
        fn area(&self) -> f64;
    }

    struct Square {
        side: f64,
        _tracked: Tracked,
    }

    impl Shape for Square {
        fn area(&self) -> f64 {
            self.side * self.side
        }
    }

    #[repr(C)]
    struct Point {
        x: u32,
        y: u32,
    }

    struct Pair {
        first: Tracked,
        second: String,
    }

    // Hands its box to a pool on destruction, counting the returns
    struct ReturnToPool(Arc<AtomicUsize>);

    impl Deleter<Tracked> for ReturnToPool {
        unsafe fn delete(self, ptr: NonNull<Tracked>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        }
    }

    struct Pooled {
        value: Box<Tracked>,
        returned: Arc<AtomicUsize>,
    }

    // Safety: the box is leaked and only reclaimed by ReturnToPool
    unsafe impl Unique<Tracked> for Pooled {
        type Deleter = ReturnToPool;

        fn into_raw_parts(self) -> Option<(NonNull<Tracked>, ReturnToPool)> {
            let ptr = NonNull::from(Box::leak(self.value));
            Some((ptr, ReturnToPool(self.returned)))
        }
    }

    mod creation {
        use super::*;

        #[test]
        fn new_starts_with_a_single_owner() {
            let counter = LiveCounter::new();
            let shared = Shared::new(counter.track(1));

            assert_eq!(shared.value, 1);
            assert_eq!(Shared::use_count(&shared), 1);
            assert_eq!(Shared::weak_count(&shared), 0);
            assert_eq!(counter.live(), 1);

            drop(shared);
            assert_eq!(counter.live(), 0);
            assert_eq!(counter.dropped(), 1);
        }

        #[test]
        fn from_box() {
            let counter = LiveCounter::new();
            let shared: Shared<Tracked> = Shared::from(Box::new(counter.track(2)));

            assert_eq!(shared.value, 2);
            assert_eq!(Shared::use_count(&shared), 1);

            drop(shared);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn from_boxed_slice() {
            let boxed: Box<[i32]> = vec![1, 2, 3].into_boxed_slice();
            let shared: Shared<[i32]> = Shared::from(boxed);

            assert_eq!(&*shared, &[1, 2, 3]);
        }

        #[test]
        fn from_unique_consumes_the_source() {
            let counter = LiveCounter::new();
            let mut source = Some(Box::new(counter.track(3)));

            let shared = Shared::from_unique(source.take()).unwrap();
            assert!(source.is_none());
            assert_eq!(Shared::use_count(&shared), 1);
            assert_eq!(Shared::weak_count(&shared), 0);
            assert_eq!(counter.live(), 1);

            drop(shared);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn from_empty_unique() {
            let source: Option<Box<Tracked>> = None;
            assert!(Shared::from_unique(source).is_none());
        }

        #[test]
        fn from_a_custom_unique_owner() {
            let counter = LiveCounter::new();
            let returned = Arc::new(AtomicUsize::new(0));
            let pooled = Pooled {
                value: Box::new(counter.track(6)),
                returned: returned.clone(),
            };

            let shared = Shared::from_unique(pooled).unwrap();
            let weak = Shared::downgrade(&shared);
            let copy = shared.clone();
            assert_eq!(copy.value, 6);

            drop(shared);
            assert_eq!(returned.load(Ordering::SeqCst), 0);

            drop(copy);
            assert_eq!(returned.load(Ordering::SeqCst), 1);
            assert_eq!(counter.live(), 0);
            assert!(weak.expired());

            drop(weak);
            assert_eq!(returned.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn custom_deleter_runs_once() {
            let calls = Arc::new(AtomicUsize::new(0));
            let ptr = NonNull::from(Box::leak(Box::new(10_u64)));

            let deleter = {
                let calls = calls.clone();
                move |ptr: NonNull<u64>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
                }
            };
            let shared = unsafe { Shared::from_raw_with_deleter(ptr, deleter) };

            let copy = shared.clone();
            drop(shared);
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(*copy, 10);

            drop(copy);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn from_raw_uses_the_default_deleter() {
            let counter = LiveCounter::new();
            let ptr = NonNull::from(Box::leak(Box::new(counter.track(4))));

            let shared = unsafe { Shared::from_raw(ptr) };
            assert_eq!(counter.live(), 1);
            drop(shared);
            assert_eq!(counter.live(), 0);
        }
    }

    mod counting {
        use super::*;

        #[test]
        fn clones_and_moves() {
            let counter = LiveCounter::new();
            let a = Shared::new(counter.track(0));

            let b = a.clone();
            assert_eq!(Shared::use_count(&a), 2);

            let c = b.clone();
            assert_eq!(Shared::use_count(&a), 3);

            // Moving doesn't change the count
            let d = c;
            assert_eq!(Shared::use_count(&d), 3);

            drop(b);
            assert_eq!(Shared::use_count(&a), 2);

            let handles = vec![a.clone(), a.clone(), d.clone()];
            assert_eq!(Shared::use_count(&a), 5);

            drop(handles);
            drop(d);
            assert_eq!(Shared::use_count(&a), 1);
            assert_eq!(counter.live(), 1);

            drop(a);
            assert_eq!(counter.live(), 0);
            assert_eq!(counter.dropped(), 1);
        }

        #[test]
        fn clone_from_the_same_object() {
            let a = Shared::new(1);
            let mut b = a.clone();

            b.clone_from(&a);
            assert_eq!(Shared::use_count(&a), 2);
            assert_eq!(a, b);
        }

        #[test]
        fn clone_from_another_object() {
            let counter = LiveCounter::new();
            let a = Shared::new(counter.track(1));
            let mut b = Shared::new(counter.track(2));
            assert_eq!(counter.live(), 2);

            b.clone_from(&a);
            assert_eq!(Shared::use_count(&a), 2);
            assert_eq!(b.value, 1);
            assert_eq!(counter.live(), 1);
        }

        #[test]
        fn clone_from_an_alias_of_the_same_object() {
            let pair = Shared::new((1, 2));
            let mut first = Shared::alias(&pair, |(first, _)| first);
            let second = Shared::alias(&pair, |(_, second)| second);
            assert_eq!(Shared::use_count(&pair), 3);

            first.clone_from(&second);
            assert_eq!(*first, 2);
            assert_eq!(Shared::use_count(&pair), 3);
        }

        #[test]
        fn reset_releases_the_previous_object() {
            let counter = LiveCounter::new();
            let mut a = Shared::new(counter.track(1));
            let b = a.clone();

            Shared::reset(&mut a, Box::new(counter.track(2)));
            assert_eq!(a.value, 2);
            assert_eq!(Shared::use_count(&a), 1);
            assert_eq!(Shared::use_count(&b), 1);
            assert_eq!(counter.live(), 2);

            drop(b);
            assert_eq!(counter.live(), 1);
        }

        #[test]
        fn reset_raw_with_a_deleter() {
            let counter = LiveCounter::new();
            let mut shared = Shared::new(counter.track(1));

            let ptr = NonNull::from(Box::leak(Box::new(counter.track(2))));
            let deleter = |ptr: NonNull<Tracked>| drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            unsafe { Shared::reset_raw(&mut shared, ptr, deleter) };

            assert_eq!(shared.value, 2);
            assert_eq!(counter.live(), 1);
            drop(shared);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn optional_handles_can_be_emptied() {
            let counter = LiveCounter::new();
            let mut slot = Some(Shared::new(counter.track(1)));

            slot.take();
            assert!(slot.is_none());
            assert_eq!(counter.live(), 0);
        }
    }

    mod conversion {
        use super::*;

        #[test]
        fn upcast_to_a_trait_object() {
            let counter = LiveCounter::new();
            let square = Shared::new(Square {
                side: 2.0,
                _tracked: counter.track(0),
            });
            let shape: Shared<dyn Shape> = upcast!(square.clone(), dyn Shape);

            assert_eq!(shape.area(), 4.0);
            assert_eq!(Shared::use_count(&square), 2);
            assert!(Shared::ptr_eq(&square, &shape));

            drop(square);
            assert_eq!(counter.live(), 1);

            // The object is destroyed as a Square even though the last handle is a dyn Shape
            drop(shape);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn upcast_an_adopted_box() {
            let counter = LiveCounter::new();
            let square: Shared<Square> = Shared::from(Box::new(Square {
                side: 3.0,
                _tracked: counter.track(0),
            }));

            let shape = upcast!(square, dyn Shape);
            assert_eq!(shape.area(), 9.0);
            assert_eq!(Shared::use_count(&shape), 1);

            drop(shape);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn upcast_to_a_slice() {
            let array = Shared::new([1, 2, 3]);
            let slice = upcast!(array, [i32]);

            assert_eq!(slice.len(), 3);
        }

        #[test]
        fn boxed_trait_objects_can_be_adopted() {
            let boxed: Box<dyn Display + Send + Sync> = Box::new(42);
            let shared: Shared<dyn Display + Send + Sync> = Shared::from(boxed);

            assert_eq!(shared.to_string(), "42");
        }
    }

    mod aliasing {
        use super::*;

        #[test]
        fn alias_keeps_the_whole_object_alive() {
            let counter = LiveCounter::new();
            let pair = Shared::new(Pair {
                first: counter.track(1),
                second: "two".into(),
            });

            let second = Shared::alias(&pair, |pair| &pair.second);
            assert_eq!(Shared::use_count(&pair), 2);
            assert!(Shared::owner_eq(&pair, &second));

            drop(pair);
            assert_eq!(*second, "two");
            assert_eq!(counter.live(), 1);
            assert_eq!(Shared::use_count(&second), 1);

            drop(second);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn map_moves_ownership() {
            let counter = LiveCounter::new();
            let pair = Shared::new(Pair {
                first: counter.track(5),
                second: String::new(),
            });

            let first = Shared::map(pair, |pair| &pair.first);
            assert_eq!(first.value, 5);
            assert_eq!(Shared::use_count(&first), 1);

            drop(first);
            assert_eq!(counter.live(), 0);
        }

        #[test]
        fn filter_map() {
            let maybe = Shared::new(Some(10));
            let value = Shared::filter_map(maybe, |maybe| maybe.as_ref()).unwrap();
            assert_eq!(*value, 10);

            let nothing = Shared::new(None::<i32>);
            let nothing = Shared::filter_map(nothing, |maybe| maybe.as_ref()).unwrap_err();
            assert_eq!(Shared::use_count(&nothing), 1);
        }

        #[test]
        fn aliases_compare_by_address() {
            let point = Shared::new(Point { x: 1, y: 2 });
            let x = Shared::alias(&point, |point| &point.x);
            let y = Shared::alias(&point, |point| &point.y);

            // The first field shares its address with the struct
            assert_eq!(Shared::address(&point), Shared::address(&x));
            assert!(point == x);
            assert!(x != y);
            assert!(Shared::owner_eq(&x, &y));
        }

        #[test]
        fn alias_raw() {
            let values = Shared::new([1, 2, 3]);
            let last = unsafe { Shared::alias_raw(&values, NonNull::from(&values[2])) };

            drop(values);
            assert_eq!(*last, 3);
        }
    }

    mod comparison {
        use super::*;

        #[test]
        fn identity_not_value() {
            let a = Shared::new(1);
            let b = Shared::new(1);
            let c = a.clone();

            assert_ne!(a, b);
            assert_eq!(a, c);
        }

        #[test]
        fn hashing_by_address() {
            let a = Shared::new(1);
            let b = Shared::new(1);

            let set: HashSet<_> = [a.clone(), b.clone(), a.clone()].into_iter().collect();
            assert_eq!(set.len(), 2);
        }

        #[test]
        fn ordering_by_address() {
            let a = Shared::new(1);
            let b = Shared::new(2);

            assert_eq!(
                a < b,
                Shared::as_ptr(&a).cast::<u8>() < Shared::as_ptr(&b).cast::<u8>()
            );
        }

        #[test]
        fn display_and_debug() {
            let shared = Shared::new("hello");
            assert_eq!(shared.to_string(), "hello");
            assert_eq!(format!("{shared:?}"), "\"hello\"");
        }
    }

    mod mutation {
        use super::*;

        #[test]
        fn get_mut_requires_a_unique_handle() {
            let mut shared = Shared::new(1);
            *Shared::get_mut(&mut shared).unwrap() = 2;
            assert_eq!(*shared, 2);

            let copy = shared.clone();
            assert!(Shared::get_mut(&mut shared).is_none());
            drop(copy);

            let weak = Shared::downgrade(&shared);
            assert!(Shared::get_mut(&mut shared).is_none());
            drop(weak);

            assert!(Shared::get_mut(&mut shared).is_some());
        }

        #[test]
        fn make_mut_clones_when_shared() {
            let mut a = Shared::new(String::from("a"));
            let b = a.clone();

            Shared::make_mut(&mut a).push('!');
            assert_eq!(*a, "a!");
            assert_eq!(*b, "a");
            assert_eq!(Shared::use_count(&a), 1);
            assert_eq!(Shared::use_count(&b), 1);

            let before = Shared::address(&a);
            Shared::make_mut(&mut a).push('!');
            assert_eq!(Shared::address(&a), before);
            assert_eq!(*a, "a!!");
        }
    }
}

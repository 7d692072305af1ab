//! Rayon or sequential iteration, chosen by the `parallel` feature.
//!
//! With the feature on this is rayon's prelude. Without it the same method
//! names resolve to plain iterators, so call sites need no `cfg` of their own.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// `into_par_iter()` as `into_iter()`
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }

    /// `par_iter()` as iteration over a borrow
    pub trait IntoParallelRefIterator<'data> {
        type Iter;
        fn par_iter(&'data self) -> Self::Iter;
    }

    impl<'data, I: 'data + ?Sized> IntoParallelRefIterator<'data> for I
    where
        &'data I: IntoIterator,
    {
        type Iter = <&'data I as IntoIterator>::IntoIter;
        fn par_iter(&'data self) -> Self::Iter {
            self.into_iter()
        }
    }

    /// Rayon adaptors that plain iterators lack
    pub trait ParallelIterator: Iterator + Sized {
        /// One scratch value for the whole sequence
        fn map_init<T, R, INIT, F>(self, init: INIT, map_op: F) -> MapInit<Self, T, F>
        where
            INIT: Fn() -> T,
            F: FnMut(&mut T, Self::Item) -> R,
        {
            MapInit {
                iter: self,
                state: init(),
                map_op,
            }
        }
    }

    impl<I: Iterator> ParallelIterator for I {}

    pub struct MapInit<I, T, F> {
        iter: I,
        state: T,
        map_op: F,
    }

    impl<I, T, R, F> Iterator for MapInit<I, T, F>
    where
        I: Iterator,
        F: FnMut(&mut T, I::Item) -> R,
    {
        type Item = R;

        fn next(&mut self) -> Option<R> {
            let item = self.iter.next()?;
            Some((self.map_op)(&mut self.state, item))
        }
    }

}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;

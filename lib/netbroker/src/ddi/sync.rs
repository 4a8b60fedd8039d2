// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Safe abstractions for synchronization primitives.
//!
//! We name the mutex `KMutex` (Kernel Mutex) on purpose. The API for
//! a kernel mutex isn't quite the same as a userland `Mutex`, and
//! using `KMutex` makes it obvious that we are using a mutex, but not
//! the one that comes from std.
//!
//! In the hypervisor build the lock is a spinlock: registry critical
//! sections are short, bounded computations and the callers never
//! sleep. In a std environment we just wrap `Mutex`.

use core::ops::Deref;
use core::ops::DerefMut;

cfg_if! {
    if #[cfg(all(not(feature = "std"), not(test)))] {
        use spin::mutex::SpinMutex;
        use spin::mutex::SpinMutexGuard;
    } else {
        use std::sync::Mutex;
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
pub struct KMutex<T> {
    inner: SpinMutex<T>,
}

#[cfg(all(not(feature = "std"), not(test)))]
pub struct KMutexGuard<'a, T: 'a> {
    guard: SpinMutexGuard<'a, T>,
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner()
    }

    pub const fn new(val: T) -> Self {
        KMutex { inner: SpinMutex::new(val) }
    }

    /// Acquire the mutex guard to gain access to the underlying
    /// value. If the guard is currently held, this call spins. The
    /// mutex is released when the guard is dropped.
    pub fn lock(&self) -> KMutexGuard<T> {
        KMutexGuard { guard: self.inner.lock() }
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

#[cfg(all(not(feature = "std"), not(test)))]
impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

// In a std environment we just wrap `Mutex`.
#[cfg(any(feature = "std", test))]
pub struct KMutex<T> {
    inner: Mutex<T>,
}

#[cfg(any(feature = "std", test))]
pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

#[cfg(any(feature = "std", test))]
impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

#[cfg(any(feature = "std", test))]
impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

#[cfg(any(feature = "std", test))]
impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap()
    }

    pub const fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    pub fn lock(&self) -> KMutexGuard<T> {
        let guard = self.inner.lock().unwrap();
        KMutexGuard { guard }
    }
}

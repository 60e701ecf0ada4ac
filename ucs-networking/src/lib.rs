// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual network ports backing the vNICs of bare-metal machines

mod binder;
mod client;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use binder::BindingContext;
pub use binder::CreatedPort;
pub use binder::VirtualPortBinder;
pub use client::*;

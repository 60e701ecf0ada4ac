// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lifecycle orchestration of UCS bare-metal machine networking
//!
//! [`LifecycleReconciler`] drives the vNICs, virtual ports and port records
//! of one machine through inspection, provisioning, cleaning and tenant
//! attachment.  Callers serialize operations on a machine through a
//! [`MachineLocker`]; within an operation the reconciler persists each
//! externally visible step before taking the next one, so that a failed
//! operation can be retried.

// We only use rustdoc for internal documentation, including private items.
#![allow(rustdoc::private_intra_doc_links)]

pub mod background;
mod inspection;
mod interfaces;
mod passthru;
mod reconciler;
mod tenant;
mod vif;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use inspection::MAX_INSPECTION_VNICS;
pub use interfaces::BootConfig;
pub use interfaces::InspectionStatus;
pub use interfaces::InspectorClient;
pub use interfaces::LockMode;
pub use interfaces::MachineLock;
pub use interfaces::MachineLocker;
pub use interfaces::PowerControl;
pub use passthru::AttachRequest;
pub use passthru::VendorPassthru;
pub use reconciler::Collaborators;
pub use reconciler::LifecycleReconciler;
pub use reconciler::NetworkPhase;
pub use reconciler::PHASE_VNIC_SLOT;
pub use tenant::TenantSummary;
pub use vif::Vif;
pub use vif::VifPlugger;

// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! CPU/GPU synchronization: the fence counter, the command list pool, deferred destruction.

pub mod command_list;
pub mod frame_synchronizer;
pub mod retirement;

pub use command_list::{CommandList, CommandListPool};
pub use frame_synchronizer::FrameSynchronizer;
pub use retirement::RetirementQueue;

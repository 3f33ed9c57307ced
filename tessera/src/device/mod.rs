mod global;

pub use global::{DeviceBuffer, GlobalTensor};

use crate::arch::{AIV_PER_AIC, SyncHub};

/// Identity of one core inside a kernel launch. Matrix cores and vector
/// cores are numbered per pair; a matrix core has `subcore_index == 0`,
/// the two vector cores of the pair are subcores 0 and 1.
#[derive(Debug, Clone, Copy)]
pub struct CoreContext {
    pub pair_index: usize,
    pub pair_count: usize,
    pub subcore_index: usize,
}

impl CoreContext {
    /// Linear index among all vector cores of the launch.
    pub fn aiv_index(&self) -> usize {
        self.pair_index * AIV_PER_AIC + self.subcore_index
    }

    pub fn aiv_count(&self) -> usize {
        self.pair_count * AIV_PER_AIC
    }
}

/// Runs one kernel invocation: one matrix-core thread and two vector-core
/// threads per pair, all released together by the start barrier and drained
/// by scope join before control returns to the host. This is the single
/// flag-safe ordering every pipeline variant goes through.
pub fn launch<A, V>(pair_count: usize, aic_role: A, aiv_role: V)
where
    A: Fn(&CoreContext, &SyncHub) + Sync,
    V: Fn(&CoreContext, &SyncHub) + Sync,
{
    let hub = SyncHub::new(pair_count, pair_count * (1 + AIV_PER_AIC));
    std::thread::scope(|scope| {
        for pair_index in 0..pair_count {
            let context = CoreContext {
                pair_index,
                pair_count,
                subcore_index: 0,
            };
            let hub = &hub;
            let aic_role = &aic_role;
            scope.spawn(move || {
                hub.wait_start();
                aic_role(&context, hub);
            });
            for subcore_index in 0..AIV_PER_AIC {
                let context = CoreContext {
                    pair_index,
                    pair_count,
                    subcore_index,
                };
                let aiv_role = &aiv_role;
                scope.spawn(move || {
                    hub.wait_start();
                    aiv_role(&context, hub);
                });
            }
        }
    });
}

/// Launch variant for kernels that only use the matrix cores.
pub fn launch_aic_only<A>(core_count: usize, aic_role: A)
where
    A: Fn(&CoreContext, &SyncHub) + Sync,
{
    let hub = SyncHub::new(core_count, core_count);
    std::thread::scope(|scope| {
        for pair_index in 0..core_count {
            let context = CoreContext {
                pair_index,
                pair_count: core_count,
                subcore_index: 0,
            };
            let hub = &hub;
            let aic_role = &aic_role;
            scope.spawn(move || {
                hub.wait_start();
                aic_role(&context, hub);
            });
        }
    });
}

/// Launch variant for kernels that only use the vector cores.
pub fn launch_aiv_only<V>(pair_count: usize, aiv_role: V)
where
    V: Fn(&CoreContext, &SyncHub) + Sync,
{
    let hub = SyncHub::new(pair_count, pair_count * AIV_PER_AIC);
    std::thread::scope(|scope| {
        for pair_index in 0..pair_count {
            for subcore_index in 0..AIV_PER_AIC {
                let context = CoreContext {
                    pair_index,
                    pair_count,
                    subcore_index,
                };
                let hub = &hub;
                let aiv_role = &aiv_role;
                scope.spawn(move || {
                    hub.wait_start();
                    aiv_role(&context, hub);
                });
            }
        }
    });
}

//! Bootstraps the rank-level transports and spawns the OS thread backing
//! each rank.
//!
//! Grounded on `timely_communication::initialize`: a `Configuration`
//! describes the desired deployment, `try_build` turns it into a vector of
//! builders (one per rank), and `initialize_from` spawns a named OS thread
//! per builder, running the caller's closure with the built transport.

use std::any::Any;
use std::sync::Arc;
use std::thread;

use crate::allocator::{Generic, GenericBuilder, TransportBuilder};
use crate::allocator::process::Process;
use crate::allocator::thread::ThreadBuilder;

/// Describes the rank topology to bootstrap.
pub enum Configuration {
    /// A single rank, no cross-rank transport.
    Thread,
    /// Several ranks sharing this OS process, connected by channels.
    Process(usize),
}

impl Configuration {
    /// Parses a configuration from command-line-style arguments.
    ///
    /// Recognises `-n, --ranks NUM` (defaulting to 1); this is the subset
    /// of spec §6's "Environment/CLI" surface this crate understands.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Configuration, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("n", "ranks", "number of ranks in this process", "NUM");
        let matches = opts.parse(args).map_err(|e| format!("{:?}", e))?;
        let ranks = matches.opt_str("n").map(|x| x.parse().unwrap_or(1)).unwrap_or(1);
        Ok(if ranks > 1 { Configuration::Process(ranks) } else { Configuration::Thread })
    }

    /// Assembles the transport builders described by this configuration.
    pub fn try_build(self) -> Result<Vec<GenericBuilder>, String> {
        match self {
            Configuration::Thread => Ok(vec![GenericBuilder::Thread(ThreadBuilder)]),
            Configuration::Process(ranks) => {
                if ranks == 0 { return Err("Configuration::Process(0): need at least one rank".into()); }
                Ok(Process::new_vector(ranks).into_iter().map(GenericBuilder::Process).collect())
            }
        }
    }
}

/// Bootstraps ranks from a `Configuration` and runs `func` on each.
pub fn initialize<T, F>(config: Configuration, func: F) -> Result<RankGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(Generic) -> T + Send + Sync + 'static,
{
    let builders = config.try_build()?;
    initialize_from(builders, func)
}

/// Spawns one OS thread per transport builder, running `func` with the
/// built transport.
pub fn initialize_from<A, T, F>(builders: Vec<A>, func: F) -> Result<RankGuards<T>, String>
where
    A: TransportBuilder + 'static,
    T: Send + 'static,
    F: Fn(<A as TransportBuilder>::Transport) -> T + Send + Sync + 'static,
{
    let logic = Arc::new(func);
    let mut guards = Vec::with_capacity(builders.len());
    for (index, builder) in builders.into_iter().enumerate() {
        let logic = logic.clone();
        let guard = thread::Builder::new()
            .name(format!("ttg rank {}", index))
            .spawn(move || {
                let transport = builder.build();
                (*logic)(transport)
            })
            .map_err(|e| format!("{:?}", e))?;
        guards.push(guard);
    }
    Ok(RankGuards { guards })
}

/// Join handles for the OS threads backing each rank.
pub struct RankGuards<T: Send + 'static> {
    guards: Vec<thread::JoinHandle<T>>,
}

impl<T: Send + 'static> RankGuards<T> {
    /// Blocks until every rank's thread has returned, collecting results.
    pub fn join(self) -> Vec<Result<T, Box<dyn Any + Send>>> {
        self.guards.into_iter().map(|g| g.join()).collect()
    }

    /// The number of ranks being tracked.
    pub fn len(&self) -> usize { self.guards.len() }

    /// Whether there are no ranks being tracked.
    pub fn is_empty(&self) -> bool { self.guards.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_config_yields_one_rank() {
        let guards = initialize(Configuration::Thread, |t| {
            use crate::allocator::Transport;
            t.index()
        }).unwrap();
        let results = guards.join();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 0);
    }

    #[test]
    fn process_config_yields_n_ranks_each_aware_of_peers() {
        let guards = initialize(Configuration::Process(4), |t| {
            use crate::allocator::Transport;
            (t.index(), t.peers())
        }).unwrap();
        let mut results: Vec<(usize, usize)> = guards.join().into_iter().map(|r| r.unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }
}

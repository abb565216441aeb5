//! Channel resolution between a producer slot and its consumers.
//!
//! The producer picks one descriptor from what it can emit; every consumer
//! then gets the cheapest chain of conversions from that descriptor into
//! something it accepts. Same-descriptor hand-offs cost nothing.

use polyplan_core::channel::{conversions_from, ChannelConversion, ChannelDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionPath {
    pub steps: Vec<&'static ChannelConversion>,
    pub cost: f64,
}

impl ConversionPath {
    pub fn target(&self, from: ChannelDescriptor) -> ChannelDescriptor {
        self.steps.last().map_or(from, |c| c.to)
    }
}

/// Resolution of one producer output towards all of its consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupResolution {
    pub descriptor: ChannelDescriptor,
    /// One per consumer, same order as the input.
    pub paths: Vec<ConversionPath>,
    pub cost: f64,
}

/// Dijkstra over the conversion table; ties prefer fewer steps.
pub fn cheapest_path(
    from: ChannelDescriptor,
    accepted: &[ChannelDescriptor],
    step_cost: &dyn Fn(&ChannelConversion) -> f64,
) -> Option<ConversionPath> {
    let mut best: Vec<(ChannelDescriptor, ConversionPath)> = vec![(
        from,
        ConversionPath {
            steps: Vec::new(),
            cost: 0.0,
        },
    )];
    let mut settled: Vec<ChannelDescriptor> = Vec::new();

    loop {
        let next = best
            .iter()
            .filter(|(d, _)| !settled.contains(d))
            .min_by(|(_, a), (_, b)| {
                a.cost
                    .total_cmp(&b.cost)
                    .then(a.steps.len().cmp(&b.steps.len()))
            })
            .cloned();
        let Some((at, path)) = next else {
            return None;
        };
        if accepted.contains(&at) {
            return Some(path);
        }
        settled.push(at);
        for conv in conversions_from(at) {
            if settled.contains(&conv.to) {
                continue;
            }
            let cost = path.cost + step_cost(conv).max(0.0);
            let mut steps = path.steps.clone();
            steps.push(conv);
            let candidate = ConversionPath { steps, cost };
            match best.iter_mut().find(|(d, _)| *d == conv.to) {
                Some((_, existing)) => {
                    if candidate.cost < existing.cost
                        || (candidate.cost == existing.cost && candidate.steps.len() < existing.steps.len())
                    {
                        *existing = candidate;
                    }
                }
                None => best.push((conv.to, candidate)),
            }
        }
    }
}

/// Pick the producer descriptor minimizing total conversion cost.
///
/// Returns `Err(i)` with the index of a consumer that no descriptor can
/// reach.
pub fn resolve_group(
    produced: &[ChannelDescriptor],
    consumers: &[Vec<ChannelDescriptor>],
    step_cost: &dyn Fn(&ChannelConversion) -> f64,
) -> Result<GroupResolution, usize> {
    let mut best: Option<GroupResolution> = None;
    let mut unreachable = 0;
    for &descriptor in produced {
        let mut paths = Vec::with_capacity(consumers.len());
        for (i, accepted) in consumers.iter().enumerate() {
            match cheapest_path(descriptor, accepted, step_cost) {
                Some(p) => paths.push(p),
                None => {
                    unreachable = i;
                    break;
                }
            }
        }
        if paths.len() != consumers.len() {
            continue;
        }
        let cost: f64 = paths.iter().map(|p| p.cost).sum();
        let steps: usize = paths.iter().map(|p| p.steps.len()).sum();
        let better = match &best {
            None => true,
            Some(b) => {
                let b_steps: usize = b.paths.iter().map(|p| p.steps.len()).sum();
                cost < b.cost || (cost == b.cost && steps < b_steps)
            }
        };
        if better {
            best = Some(GroupResolution {
                descriptor,
                paths,
                cost,
            });
        }
    }
    best.ok_or(unreachable)
}

/// Descriptors acceptable on a slot; broadcast slots need reusable channels.
pub fn accepted_on(supported: Vec<ChannelDescriptor>, broadcast: bool) -> Vec<ChannelDescriptor> {
    if broadcast {
        supported.into_iter().filter(|d| d.is_reusable()).collect()
    } else {
        supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelDescriptor::*;

    fn unit(_: &ChannelConversion) -> f64 {
        1.0
    }

    #[test]
    fn same_descriptor_needs_no_conversion() {
        let p = cheapest_path(Collection, &[Collection, Stream], &unit).unwrap();
        assert!(p.steps.is_empty());
        assert_eq!(p.cost, 0.0);
    }

    #[test]
    fn stream_to_partitioned_goes_through_collection() {
        let p = cheapest_path(Stream, &[Partitioned], &unit).unwrap();
        let keys: Vec<_> = p.steps.iter().map(|c| c.spec_key).collect();
        assert_eq!(keys, ["conversion.collect", "conversion.parallelize"]);
        assert_eq!(p.target(Stream), Partitioned);
    }

    #[test]
    fn group_prefers_cheapest_producer_descriptor() {
        let consumers = vec![vec![Partitioned], vec![Partitioned]];
        let g = resolve_group(&[Stream, Collection], &consumers, &unit).unwrap();
        assert_eq!(g.descriptor, Collection);
        assert_eq!(g.cost, 2.0);
    }

    #[test]
    fn unreachable_consumer_is_reported() {
        assert_eq!(resolve_group(&[Stream], &[vec![]], &unit), Err(0));
    }

    #[test]
    fn broadcast_slots_drop_streams() {
        assert_eq!(accepted_on(vec![Stream, Collection], true), vec![Collection]);
    }
}

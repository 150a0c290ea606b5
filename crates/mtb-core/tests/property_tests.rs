//! Property-based tests for case naming, rank ordering and the subscription grammar
//!
//! Uses proptest to verify invariants that must hold for any case list or entry.

use proptest::prelude::*;
use mtb_core::case::{context_name, rank_width};
use mtb_core::channel::{SignalChannel, SignalSeries};
use mtb_core::resolver::resolve;
use mtb_core::{
    Binding, Campaign, CampaignConfig, CampaignError, CaseDescriptor, CaseSheet, Channel,
    ChannelRegistry, MemoryPlatform,
};

// ============================================================================
// Strategy Generators
// ============================================================================

/// Unique ranks in arbitrary order
fn ranks_strategy(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::hash_set(0u32..100_000, 1..max_len)
        .prop_map(|ranks| ranks.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn case_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ._/-]{0,24}").expect("valid regex")
}

/// Text that can never follow the grammar: no `=` and no `~`
fn free_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^=~]{0,80}").expect("valid regex")
}

fn registry() -> ChannelRegistry {
    ChannelRegistry::new(vec![Channel::Signal(
        SignalChannel::new("mtb_s_1").with_default(SignalSeries::constant(1.0)),
    )])
    .unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// The rank prefix is padded to the digit count of the largest rank
    #[test]
    fn context_name_width_matches_largest_rank(
        ranks in ranks_strategy(40),
        name in case_name_strategy(),
    ) {
        let max = *ranks.iter().max().unwrap();
        let width = rank_width(max);
        prop_assert_eq!(width, max.to_string().len());

        for rank in ranks {
            let context = context_name(rank, &name, width);
            let (prefix, rest) = context.split_once('_').unwrap();
            prop_assert_eq!(prefix.len(), width);
            prop_assert_eq!(prefix.parse::<u32>().unwrap(), rank);
            prop_assert!(!rest.contains('.'));
            prop_assert!(!rest.contains('/'));
        }
    }

    /// A sheet always lists its cases in strictly increasing rank order
    #[test]
    fn sheet_orders_cases_by_rank(ranks in ranks_strategy(40)) {
        let cases = ranks
            .iter()
            .map(|&rank| CaseDescriptor::new(rank, format!("case {}", rank), rank % 2 == 0))
            .collect();
        let sheet = CaseSheet::new("Plant", cases, Vec::new(), Vec::new()).unwrap();

        let ordered: Vec<u32> = sheet.cases().iter().map(|c| c.rank).collect();
        prop_assert!(ordered.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(ordered.len(), ranks.len());
        prop_assert!(sheet.dynamic_cases().all(|c| c.rank % 2 == 0));
    }

    /// Entries outside the grammar register nothing and never fail
    #[test]
    fn free_text_is_a_no_op(entries in prop::collection::vec(free_text_strategy(), 0..10)) {
        let mut registry = registry();
        for entry in &entries {
            prop_assert!(Binding::parse(entry).is_none());
        }

        let summary = resolve(entries.iter().map(String::as_str), &mut registry).unwrap();
        prop_assert_eq!(summary.registered, 0);
        prop_assert_eq!(summary.ignored, entries.len());
        prop_assert_eq!(registry.binding_count(), 0);
    }

    /// A well-formed entry naming an absent channel is always fatal
    #[test]
    fn unknown_channel_is_fatal(channel in "[a-z][a-z0-9_]{0,12}") {
        prop_assume!(channel != "mtb_s_1");
        let mut registry = registry();
        let entry = format!("Bus1:u0={}:S~x", channel);

        let result = resolve([entry.as_str()], &mut registry);
        prop_assert!(matches!(result, Err(CampaignError::UnknownChannel(ref name)) if *name == channel));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Contexts are provisioned and exported in increasing rank order
    #[test]
    fn campaign_provisions_in_rank_order(ranks in ranks_strategy(8)) {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = ranks
            .iter()
            .map(|&rank| CaseDescriptor::new(rank, "case", true))
            .collect();
        let sheet = CaseSheet::new("Plant", cases, Vec::new(), Vec::new()).unwrap();
        let config = CampaignConfig::new(dir.path().join("cases.json"), dir.path().join("export"));

        let mut campaign = Campaign::new(config, sheet);
        let report = campaign.run(|| Ok(MemoryPlatform::test_bench())).unwrap();

        let provisioned: Vec<u32> = campaign.contexts().iter().map(|c| c.rank).collect();
        prop_assert!(provisioned.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(provisioned.len(), ranks.len());
        prop_assert_eq!(report.tasks, 2 * ranks.len());
    }
}

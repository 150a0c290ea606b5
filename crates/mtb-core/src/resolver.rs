//! Attach parsed subscription entries to their source channels.

use serde::Serialize;

use crate::binding::{split_batch, Binding, BindingKind};
use crate::channel::{Channel, ChannelRegistry, Destination};
use crate::config::Slots;
use crate::error::{CampaignError, CampaignResult};
use crate::expr::Transform;

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    /// Entries that followed the grammar and were registered
    pub registered: usize,
    /// Entries that did not follow the grammar
    pub ignored: usize,
}

/// Register every matching entry on its channel.
///
/// Entries that do not follow the grammar are skipped. An entry naming a
/// channel the registry does not contain aborts the whole pass, as does a
/// transform that cannot be parsed.
pub fn resolve<'a, I>(entries: I, registry: &mut ChannelRegistry) -> CampaignResult<ResolveSummary>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut summary = ResolveSummary::default();

    for entry in entries {
        let Some(binding) = Binding::parse(entry) else {
            if !entry.trim().is_empty() {
                tracing::debug!(entry = %entry, "Ignoring entry outside the subscription grammar");
            }
            summary.ignored += 1;
            continue;
        };
        register(&binding, registry)?;
        summary.registered += 1;
    }

    tracing::info!(
        registered = summary.registered,
        ignored = summary.ignored,
        "Subscriptions resolved"
    );
    Ok(summary)
}

fn register(binding: &Binding, registry: &mut ChannelRegistry) -> CampaignResult<()> {
    let channel = registry
        .get_mut(&binding.channel)
        .ok_or_else(|| CampaignError::UnknownChannel(binding.channel.clone()))?;
    let destination = Destination::new(&binding.object_path, &binding.attribute);

    match channel {
        Channel::Signal(signal) => {
            let transform = Transform::parse(&binding.expression)?;
            tracing::debug!(
                channel = %signal.name,
                kind = %binding.kind,
                path = %destination.object_path,
                attribute = %destination.attribute,
                transform = %transform,
                "Signal subscription registered"
            );
            match binding.kind {
                BindingKind::Set | BindingKind::Constant => signal.add_set(destination, transform),
                BindingKind::SetInitial => signal.add_set_initial(destination, transform),
                BindingKind::Ramp => signal.add_ramp(destination, transform),
                BindingKind::Trigger => signal.add_trigger(destination, transform),
            }
        }
        Channel::Constant(c) => c.add_destination(destination),
        Channel::ObjectReference(c) => c.add_destination(destination),
        Channel::String(c) => c.add_destination(destination),
    }
    Ok(())
}

/// Entry generated for one well-known slot.
///
/// Slots without an object or attribute produce an empty entry, which the
/// grammar never matches. A configured slot requires its signal channel.
pub fn slot_entries(slots: &Slots, registry: &ChannelRegistry) -> CampaignResult<Vec<String>> {
    slots
        .signals()
        .into_iter()
        .map(|(signal, slot)| {
            let Some(slot) = slot.filter(|s| !s.object.is_empty() && !s.attribute.is_empty())
            else {
                return Ok(String::new());
            };
            match registry.get(signal) {
                Some(Channel::Signal(_)) => {}
                Some(_) => {
                    return Err(CampaignError::ChannelKindMismatch {
                        name: signal.to_string(),
                        expected: "signal",
                    })
                }
                None => return Err(CampaignError::UnknownChannel(signal.to_string())),
            }
            let object = if slot.object.starts_with('\\') {
                slot.object.clone()
            } else {
                format!("\\{}", slot.object)
            };
            Ok(format!(
                "{}:{}={}:S~{:?} * x",
                object, slot.attribute, signal, slot.scale
            ))
        })
        .collect()
}

/// All entries of a campaign, in resolution order: the sheet's default
/// bindings, the configured batch, then the well-known slots.
pub fn campaign_entries(
    sheet_bindings: &[String],
    batch: &str,
    slots: &Slots,
    registry: &ChannelRegistry,
) -> CampaignResult<Vec<String>> {
    let mut entries: Vec<String> = sheet_bindings.to_vec();
    if !batch.is_empty() {
        entries.extend(split_batch(batch).map(str::to_string));
    }
    entries.extend(slot_entries(slots, registry)?);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{SignalChannel, SignalSeries, ValueChannel};
    use crate::config::SlotConfig;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(vec![
            Channel::Signal(SignalChannel::new("mtb_s_1").with_default(SignalSeries::constant(0.5))),
            Channel::Signal(SignalChannel::new("mtb_s_pref_pu")),
            Channel::Constant(ValueChannel::new("mtb_c_scr").with_default(3.0)),
            Channel::String(ValueChannel::new("mtb_t_label")),
            Channel::ObjectReference(ValueChannel::new("mtb_o_grid")),
        ])
        .unwrap()
    }

    #[test]
    fn test_signal_entry_registers_set_subscription() {
        let mut reg = registry();
        let summary = resolve(["Bus1:u0=mtb_s_1:s~2.0 * x"], &mut reg).unwrap();
        assert_eq!(summary.registered, 1);

        let Some(Channel::Signal(signal)) = reg.get("mtb_s_1") else {
            panic!("expected signal");
        };
        let sub = &signal.subscriptions()[0];
        assert_eq!(sub.kind, BindingKind::Set);
        assert_eq!(sub.destination, Destination::new("Bus1", "u0"));
        assert_eq!(sub.transform.apply(0.5).unwrap(), 1.0);
    }

    #[test]
    fn test_constant_kind_on_signal_registers_as_set() {
        let mut reg = registry();
        resolve(["Obj:a=mtb_s_1:C~x"], &mut reg).unwrap();
        let Some(Channel::Signal(signal)) = reg.get("mtb_s_1") else {
            panic!("expected signal");
        };
        assert_eq!(signal.subscriptions()[0].kind, BindingKind::Set);
    }

    #[test]
    fn test_direct_channels_get_destinations() {
        let mut reg = registry();
        resolve(
            [
                "scr.ElmDsl:e:scr=mtb_c_scr:C~ignored",
                "lbl:loc_name=mtb_t_label:S~x",
                "sw.ElmCoup:typ_id=mtb_o_grid:T~x",
            ],
            &mut reg,
        )
        .unwrap();
        for name in ["mtb_c_scr", "mtb_t_label", "mtb_o_grid"] {
            assert_eq!(reg.get(name).unwrap().binding_count(), 1, "{}", name);
        }
    }

    #[test]
    fn test_unknown_channel_is_fatal() {
        let mut reg = registry();
        let err = resolve(["Bus1:u0=doesNotExist:S~x"], &mut reg).unwrap_err();
        assert!(matches!(err, CampaignError::UnknownChannel(n) if n == "doesNotExist"));
    }

    #[test]
    fn test_non_matching_entries_leave_registry_untouched() {
        let mut reg = registry();
        let summary = resolve(["", "note: check later", "Bus1:u0=mtb_s_1:Q~x"], &mut reg).unwrap();
        assert_eq!(summary.registered, 0);
        assert_eq!(summary.ignored, 3);
        assert_eq!(reg.binding_count(), 0);
    }

    #[test]
    fn test_invalid_transform_on_signal_is_fatal() {
        let mut reg = registry();
        let err = resolve(["Bus1:u0=mtb_s_1:S~__import__('os')"], &mut reg).unwrap_err();
        assert!(matches!(err, CampaignError::InvalidExpression { .. }));
    }

    #[test]
    fn test_slot_entries() {
        let reg = registry();
        let slots = Slots {
            pref: Some(SlotConfig {
                object: r"user\Plant.IntPrj\ctrl.ElmDsl".to_string(),
                attribute: "e:Pref".to_string(),
                scale: 2.0,
            }),
            custom1: Some(SlotConfig {
                object: r"\user\x.ElmDsl".to_string(),
                attribute: String::new(),
                scale: 1.0,
            }),
            ..Default::default()
        };
        let entries = slot_entries(&slots, &reg).unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(
            entries[0],
            r"\user\Plant.IntPrj\ctrl.ElmDsl:e:Pref=mtb_s_pref_pu:S~2.0 * x"
        );
        assert!(entries[1..].iter().all(String::is_empty));

        let binding = Binding::parse(&entries[0]).unwrap();
        assert_eq!(binding.channel, "mtb_s_pref_pu");
        assert_eq!(binding.kind, BindingKind::Set);
    }

    #[test]
    fn test_slot_requires_signal_channel() {
        let reg = registry();
        let slots = Slots {
            qref_q: Some(SlotConfig {
                object: "Ctrl".to_string(),
                attribute: "Qref".to_string(),
                scale: 1.0,
            }),
            ..Default::default()
        };
        assert!(matches!(
            slot_entries(&slots, &reg),
            Err(CampaignError::UnknownChannel(n)) if n == "mtb_s_qref_q_pu"
        ));

        let reg = ChannelRegistry::new(vec![Channel::Constant(ValueChannel::new("mtb_s_qref_q_pu"))])
            .unwrap();
        assert!(matches!(
            slot_entries(&slots, &reg),
            Err(CampaignError::ChannelKindMismatch { .. })
        ));
    }

    #[test]
    fn test_campaign_entries_order() {
        let reg = registry();
        let entries = campaign_entries(
            &["a:b=mtb_s_1:S~x".to_string()],
            "c:d=mtb_s_1:R~x;e:f=mtb_c_scr:C~x",
            &Slots::default(),
            &reg,
        )
        .unwrap();
        assert_eq!(entries.len(), 3 + 7);
        assert_eq!(entries[1], "c:d=mtb_s_1:R~x");
    }
}

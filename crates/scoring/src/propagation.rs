//! Carries measured excess wait time along each transit route to the
//! links that have no stop of their own.
//!
//! From the first measured stop of a route, values are copied backwards
//! unchanged, and pushed forwards with a per-link delay delta of
//! `actual − expected` traversal time. Links that already have a value
//! act as anchors and reset the running estimate, which also makes a
//! second pass over the same tables a no-op.

use std::collections::{BTreeMap, HashSet};

use utility::id::Id;

use model::line::{TransitLine, TransitRoute};
use model::link::{Link, LinkTable};

pub(crate) fn propagate_ewt(
    routes: &[TransitRoute],
    bus_links: &HashSet<Id<Link>>,
    links: &LinkTable,
    reference_speed: &BTreeMap<Id<Link>, f64>,
    actual_times: &BTreeMap<(Id<Link>, Id<TransitLine>), f64>,
    ewt_links: &mut BTreeMap<Id<Link>, f64>,
    ewt_lines: &mut BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>>,
) {
    for route in routes {
        let Some(anchor_index) = route
            .links
            .iter()
            .position(|link| route.stop_links.contains(link) && ewt_links.contains_key(link))
        else {
            // No measured stop on this route.
            continue;
        };

        let anchor_link = &route.links[anchor_index];
        let anchor_ewt = ewt_links[anchor_link];
        let anchor_line_ewt = ewt_lines
            .get(anchor_link)
            .and_then(|lines| lines.get(&route.line_id))
            .copied()
            .unwrap_or(anchor_ewt);

        // Backward sweep: upstream links inherit the first measurement
        // as-is. No delay accumulates against driving direction.
        for index in (0..anchor_index).rev() {
            let link = &route.links[index];
            if !bus_links.contains(link) || ewt_links.contains_key(link) {
                continue;
            }
            ewt_links.insert(link.clone(), anchor_ewt);
            ewt_lines
                .entry(link.clone())
                .or_default()
                .entry(route.line_id.clone())
                .or_insert(anchor_line_ewt);
        }

        // Forward sweep: accumulate the delay picked up on each link.
        let mut current = anchor_ewt;
        let mut current_line = anchor_line_ewt;
        for index in anchor_index + 1..route.links.len() {
            let link = &route.links[index];

            if let Some(&measured) = ewt_links.get(link) {
                current = measured;
                current_line = ewt_lines
                    .get(link)
                    .and_then(|lines| lines.get(&route.line_id))
                    .copied()
                    .unwrap_or(current);
                ewt_lines
                    .entry(link.clone())
                    .or_default()
                    .entry(route.line_id.clone())
                    .or_insert(current_line);
                continue;
            }
            if !bus_links.contains(link) {
                continue;
            }

            let delay_delta = delay_delta(link, &route.line_id, links, reference_speed, actual_times);
            current += delay_delta;
            current_line += delay_delta;
            ewt_links.insert(link.clone(), current);
            ewt_lines
                .entry(link.clone())
                .or_default()
                .entry(route.line_id.clone())
                .or_insert(current_line);
        }
    }
}

/// Extra traversal time over the free-flowing expectation, or zero when
/// either side of the comparison is unknown.
fn delay_delta(
    link: &Id<Link>,
    line: &Id<TransitLine>,
    links: &LinkTable,
    reference_speed: &BTreeMap<Id<Link>, f64>,
    actual_times: &BTreeMap<(Id<Link>, Id<TransitLine>), f64>,
) -> f64 {
    let length = links.get(link).map(|meta| meta.length).unwrap_or(0.0);
    let reference = reference_speed.get(link).copied().unwrap_or(0.0);
    let actual = actual_times.get(&(link.clone(), line.clone()));

    match actual {
        Some(actual) if length > 0.0 && reference > 0.0 => actual - length / reference,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use indexmap::IndexMap;

    use model::link::LinkMeta;

    use super::*;

    fn link_table(entries: &[(&str, f64)]) -> LinkTable {
        entries
            .iter()
            .map(|(id, length)| {
                (
                    Id::from(*id),
                    LinkMeta {
                        length: *length,
                        bus_frequency: 1.0,
                    },
                )
            })
            .collect::<IndexMap<_, _>>()
    }

    fn route(line: &str, links: &[&str], stops: &[&str]) -> TransitRoute {
        TransitRoute {
            line_id: Id::from(line),
            transport_mode: "bus".to_owned(),
            links: links.iter().map(|l| Id::from(*l)).collect(),
            stop_links: stops.iter().map(|l| Id::from(*l)).collect::<BTreeSet<_>>(),
            departures: vec![0, 600],
        }
    }

    /// Route A-B-C-D with one measurement at B: A inherits the value
    /// backwards, C and D extend it forward with their delay deltas.
    #[test]
    fn propagates_backward_copy_and_forward_delta() {
        let links = link_table(&[("A", 100.0), ("B", 100.0), ("C", 200.0), ("D", 100.0)]);
        let bus_links: HashSet<Id<Link>> = links.keys().cloned().collect();
        let routes = vec![route("L1", &["A", "B", "C", "D"], &["B"])];

        let reference_speed: BTreeMap<Id<Link>, f64> =
            [("C", 10.0), ("D", 10.0)]
                .into_iter()
                .map(|(id, speed)| (Id::from(id), speed))
                .collect();
        // C takes 25 s against an expected 20 s, D matches expectation.
        let actual_times: BTreeMap<(Id<Link>, Id<TransitLine>), f64> = [
            ((Id::from("C"), Id::from("L1")), 25.0),
            ((Id::from("D"), Id::from("L1")), 10.0),
        ]
        .into_iter()
        .collect();

        let mut ewt_links = BTreeMap::from([(Id::from("B"), 30.0)]);
        let mut ewt_lines = BTreeMap::from([(
            Id::from("B"),
            BTreeMap::from([(Id::from("L1"), 30.0)]),
        )]);

        propagate_ewt(
            &routes,
            &bus_links,
            &links,
            &reference_speed,
            &actual_times,
            &mut ewt_links,
            &mut ewt_lines,
        );

        assert_eq!(ewt_links[&Id::from("A")], 30.0);
        assert_eq!(ewt_links[&Id::from("B")], 30.0);
        assert_eq!(ewt_links[&Id::from("C")], 35.0);
        assert_eq!(ewt_links[&Id::from("D")], 35.0);
        assert_eq!(ewt_lines[&Id::from("C")][&Id::from("L1")], 35.0);
        assert_eq!(ewt_lines[&Id::from("D")][&Id::from("L1")], 35.0);
    }

    #[test]
    fn route_without_measured_stop_is_skipped() {
        let links = link_table(&[("A", 100.0), ("B", 100.0)]);
        let bus_links: HashSet<Id<Link>> = links.keys().cloned().collect();
        let routes = vec![route("L1", &["A", "B"], &["B"])];

        let mut ewt_links = BTreeMap::new();
        let mut ewt_lines = BTreeMap::new();
        propagate_ewt(
            &routes,
            &bus_links,
            &links,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &mut ewt_links,
            &mut ewt_lines,
        );
        assert!(ewt_links.is_empty());
        assert!(ewt_lines.is_empty());
    }

    #[test]
    fn non_bus_links_are_left_alone() {
        let links = link_table(&[("A", 100.0), ("B", 100.0), ("C", 100.0)]);
        // Only B carries scheduled service.
        let bus_links: HashSet<Id<Link>> = [Id::from("B")].into_iter().collect();
        let routes = vec![route("L1", &["A", "B", "C"], &["B"])];

        let mut ewt_links = BTreeMap::from([(Id::from("B"), 12.0)]);
        let mut ewt_lines = BTreeMap::new();
        propagate_ewt(
            &routes,
            &bus_links,
            &links,
            &BTreeMap::new(),
            &BTreeMap::new(),
            &mut ewt_links,
            &mut ewt_lines,
        );

        assert!(!ewt_links.contains_key(&Id::from("A")));
        assert!(!ewt_links.contains_key(&Id::from("C")));
    }

    #[test]
    fn second_pass_changes_nothing() {
        let links = link_table(&[("A", 100.0), ("B", 100.0), ("C", 200.0), ("D", 100.0)]);
        let bus_links: HashSet<Id<Link>> = links.keys().cloned().collect();
        let routes = vec![route("L1", &["A", "B", "C", "D"], &["B"])];
        let reference_speed: BTreeMap<Id<Link>, f64> =
            [(Id::from("C"), 10.0)].into_iter().collect();
        let actual_times: BTreeMap<(Id<Link>, Id<TransitLine>), f64> =
            [((Id::from("C"), Id::from("L1")), 25.0)].into_iter().collect();

        let mut ewt_links = BTreeMap::from([(Id::from("B"), 30.0)]);
        let mut ewt_lines: BTreeMap<Id<Link>, BTreeMap<Id<TransitLine>, f64>> = BTreeMap::new();

        propagate_ewt(
            &routes,
            &bus_links,
            &links,
            &reference_speed,
            &actual_times,
            &mut ewt_links,
            &mut ewt_lines,
        );
        let first_links = ewt_links.clone();
        let first_lines = ewt_lines.clone();

        propagate_ewt(
            &routes,
            &bus_links,
            &links,
            &reference_speed,
            &actual_times,
            &mut ewt_links,
            &mut ewt_lines,
        );
        assert_eq!(ewt_links, first_links);
        assert_eq!(ewt_lines, first_lines);
    }
}

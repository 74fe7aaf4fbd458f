//! Session-wide adjustments applied after every track has a gain decision.

use std::collections::BTreeMap;

use crate::config::{session_params, Config};
use crate::error::ConfigError;
use crate::models::{Classification, FaderAdjustment, Session};

#[derive(Debug, Clone, PartialEq)]
pub struct FaderSettings {
    /// Filename substring of the track whose fader sits at 0 dB.
    pub anchor: Option<String>,
    /// Without an anchor, put the loudest fader at 0 dB.
    pub normalize: bool,
    pub ceiling_db: f64,
    pub headroom_db: f64,
}

impl Default for FaderSettings {
    fn default() -> Self {
        Self {
            anchor: None,
            normalize: false,
            ceiling_db: 12.0,
            headroom_db: 8.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostSteps {
    /// Groups whose members share one gain; `None` links every group.
    pub linked_groups: Option<Vec<String>>,
    pub fader: FaderSettings,
}

impl PostSteps {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.check(&session_params())?;
        let d = FaderSettings::default();
        Ok(Self {
            linked_groups: config.opt_list("gain_linked_groups"),
            fader: FaderSettings {
                anchor: config.opt_str("anchor").filter(|a| !a.trim().is_empty()).map(str::to_string),
                normalize: config.bool_or("normalize_faders", d.normalize),
                ceiling_db: config.f64_or("fader_ceiling_db", d.ceiling_db),
                headroom_db: config.f64_or("fader_headroom_db", d.headroom_db),
            },
        })
    }

    fn is_linked(&self, group: &str) -> bool {
        match &self.linked_groups {
            Some(linked) => linked.iter().any(|g| g == group),
            None => true,
        }
    }

    /// Give every member of a linked group the smallest gain in that group.
    /// The member's own gain is kept in `original_gain_db`.
    pub fn level_groups(&self, session: &mut Session, processor_id: &str) {
        let mut members: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, track) in session.ok_tracks() {
            let Some(group) = track.group.as_deref() else { continue };
            let Some(result) = track.processor_results.get(processor_id) else { continue };
            let eligible = result.error.is_none()
                && !matches!(result.classification, Classification::Silent | Classification::Skip);
            if eligible && self.is_linked(group) {
                members.entry(group.to_string()).or_default().push(index);
            }
        }

        for (group, indices) in members {
            // Re-running the step starts from each member's own gain again.
            let own_gains: Vec<(usize, f64)> = indices
                .iter()
                .map(|&i| {
                    let r = &session.tracks[i].processor_results[processor_id];
                    (i, r.data.original_gain_db.unwrap_or(r.gain_db))
                })
                .collect();
            let min_gain = own_gains.iter().map(|&(_, g)| g).fold(f64::INFINITY, f64::min);
            tracing::debug!(%group, members = own_gains.len(), min_gain, "group levelled");
            for (i, own) in own_gains {
                if let Some(result) = session.tracks[i].processor_results.get_mut(processor_id) {
                    result.data.original_gain_db = Some(own);
                    result.gain_db = min_gain;
                }
            }
        }
    }

    /// Fader offsets that undo each track's gain, anchored and rebalanced
    /// uniformly so relative fader positions never change. Silent tracks sit
    /// at 0 dB and take no part in the anchor or the rebalance.
    pub fn fader_offsets(&self, session: &mut Session, processor_id: &str) {
        let mut silent = Vec::new();
        let mut offsets: Vec<(usize, f64)> = Vec::new();
        for (index, track) in session.ok_tracks() {
            let Some(result) = track.processor_results.get(processor_id) else { continue };
            if result.error.is_some() {
                continue;
            }
            match result.classification {
                Classification::Silent => silent.push(index),
                _ => offsets.push((index, -result.gain_db)),
            }
        }
        if offsets.is_empty() && silent.is_empty() {
            return;
        }

        let anchor_offset_db = match &self.fader.anchor {
            Some(anchor) => {
                let needle = anchor.to_lowercase();
                offsets
                    .iter()
                    .find(|&&(i, _)| session.tracks[i].filename.to_lowercase().contains(&needle))
                    .map(|&(_, offset)| offset)
                    .unwrap_or_else(|| {
                        tracing::warn!(%anchor, "fader anchor matches no track");
                        0.0
                    })
            }
            None if self.fader.normalize && !offsets.is_empty() => {
                offsets.iter().map(|&(_, o)| o).fold(f64::NEG_INFINITY, f64::max)
            }
            None => 0.0,
        };

        let loudest = offsets
            .iter()
            .map(|&(_, o)| o - anchor_offset_db)
            .fold(f64::NEG_INFINITY, f64::max);
        let limit = self.fader.ceiling_db - self.fader.headroom_db;
        let rebalance_shift_db = if self.fader.headroom_db > 0.0 && loudest > limit {
            loudest - limit
        } else {
            0.0
        };

        let placed = offsets
            .into_iter()
            .map(|(index, offset)| (index, offset - anchor_offset_db - rebalance_shift_db))
            .chain(silent.into_iter().map(|index| (index, 0.0)));
        for (index, fader) in placed {
            if let Some(result) = session.tracks[index].processor_results.get_mut(processor_id) {
                result.data.fader_offset_db = Some(fader);
                result.data.fader_rebalance_shift_db = Some(rebalance_shift_db);
            }
        }
        session.fader_adjustments.insert(
            processor_id.to_string(),
            FaderAdjustment {
                anchor_offset_db,
                rebalance_shift_db,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioBuffer, BitDepth, ProcessorResult, Track};
    use approx::assert_relative_eq;

    const ID: &str = "bimodal_normalize";

    fn planned(name: &str, group: Option<&str>, gain: f64, class: Classification) -> Track {
        let mut track = Track::new(name, name, AudioBuffer::from_planar(vec![vec![0.1; 8]]), 48000, BitDepth::Int(24));
        track.group = group.map(str::to_string);
        track
            .processor_results
            .insert(ID.into(), ProcessorResult::new(ID, gain, class, "test"));
        track
    }

    fn gain(session: &Session, i: usize) -> f64 {
        session.tracks[i].processor_results[ID].gain_db
    }

    fn offset(session: &Session, i: usize) -> f64 {
        session.tracks[i].processor_results[ID].data.fader_offset_db.unwrap()
    }

    #[test]
    fn test_group_members_get_minimum() {
        let mut session = Session::new(
            vec![
                planned("kick.wav", Some("Drums"), 4.0, Classification::Transient),
                planned("snare.wav", Some("Drums"), -2.0, Classification::Transient),
                planned("oh.wav", Some("Drums"), 1.0, Classification::Sustained),
                planned("vox.wav", None, 7.0, Classification::Sustained),
            ],
            Config::new(),
        );
        PostSteps::default().level_groups(&mut session, ID);
        for i in 0..3 {
            assert_eq!(gain(&session, i), -2.0);
        }
        assert_eq!(gain(&session, 3), 7.0);
        assert_eq!(session.tracks[0].processor_results[ID].data.original_gain_db, Some(4.0));
    }

    #[test]
    fn test_levelling_never_raises_gain() {
        let gains = [3.0, -1.5, 0.25, 9.0];
        let tracks = gains
            .iter()
            .enumerate()
            .map(|(i, &g)| planned(&format!("t{}.wav", i), Some("G1"), g, Classification::Sustained))
            .collect();
        let mut session = Session::new(tracks, Config::new());
        PostSteps::default().level_groups(&mut session, ID);
        PostSteps::default().level_groups(&mut session, ID);
        for (i, &g) in gains.iter().enumerate() {
            assert!(gain(&session, i) <= g);
            assert_eq!(session.tracks[i].processor_results[ID].data.original_gain_db, Some(g));
        }
    }

    #[test]
    fn test_silent_members_and_unlinked_groups_are_left_alone() {
        let mut session = Session::new(
            vec![
                planned("a.wav", Some("Drums"), 4.0, Classification::Transient),
                planned("b.wav", Some("Drums"), 0.0, Classification::Silent),
                planned("c.wav", Some("Keys"), 5.0, Classification::Sustained),
                planned("d.wav", Some("Keys"), 1.0, Classification::Sustained),
            ],
            Config::new(),
        );
        let post = PostSteps {
            linked_groups: Some(vec!["Drums".into()]),
            ..PostSteps::default()
        };
        post.level_groups(&mut session, ID);
        assert_eq!(gain(&session, 0), 4.0);
        assert_eq!(gain(&session, 1), 0.0);
        assert_eq!(gain(&session, 2), 5.0);
    }

    #[test]
    fn test_offsets_invert_gain_with_rebalance() {
        let mut session = Session::new(
            vec![
                planned("kick.wav", None, -10.0, Classification::Transient),
                planned("pad.wav", None, 3.0, Classification::Sustained),
                planned("gap.wav", None, 0.0, Classification::Silent),
            ],
            Config::new(),
        );
        PostSteps::default().fader_offsets(&mut session, ID);
        // loudest offset 10 exceeds 12 - 8, shifted down by 6
        assert_relative_eq!(offset(&session, 0), 4.0);
        assert_relative_eq!(offset(&session, 1), -9.0);
        assert_relative_eq!(offset(&session, 2), 0.0);
        assert_eq!(session.fader_adjustments[ID].rebalance_shift_db, 6.0);
    }

    #[test]
    fn test_named_anchor_sits_at_zero() {
        let mut session = Session::new(
            vec![
                planned("Kick.wav", None, -2.0, Classification::Transient),
                planned("Lead Vox.wav", None, 5.0, Classification::Sustained),
            ],
            Config::new(),
        );
        let post = PostSteps {
            fader: FaderSettings {
                anchor: Some("vox".into()),
                headroom_db: 0.0,
                ..FaderSettings::default()
            },
            ..PostSteps::default()
        };
        post.fader_offsets(&mut session, ID);
        assert_relative_eq!(offset(&session, 1), 0.0);
        assert_relative_eq!(offset(&session, 0), 7.0);
        assert_eq!(session.fader_adjustments[ID].anchor_offset_db, -5.0);
    }

    #[test]
    fn test_normalize_puts_loudest_at_zero() {
        let mut session = Session::new(
            vec![
                planned("a.wav", None, -4.0, Classification::Transient),
                planned("b.wav", None, 2.0, Classification::Sustained),
            ],
            Config::new(),
        );
        let post = PostSteps {
            fader: FaderSettings {
                normalize: true,
                ..FaderSettings::default()
            },
            ..PostSteps::default()
        };
        post.fader_offsets(&mut session, ID);
        assert_relative_eq!(offset(&session, 0), 0.0);
        assert_relative_eq!(offset(&session, 1), -6.0);
    }

    #[test]
    fn test_normalize_ignores_silent_tracks() {
        let mut session = Session::new(
            vec![
                planned("a.wav", None, 4.0, Classification::Sustained),
                planned("b.wav", None, 2.0, Classification::Sustained),
                planned("gap.wav", None, 0.0, Classification::Silent),
            ],
            Config::new(),
        );
        let post = PostSteps {
            fader: FaderSettings {
                normalize: true,
                ..FaderSettings::default()
            },
            ..PostSteps::default()
        };
        post.fader_offsets(&mut session, ID);
        assert_relative_eq!(offset(&session, 0), -2.0);
        assert_relative_eq!(offset(&session, 1), 0.0);
        assert_relative_eq!(offset(&session, 2), 0.0);
        assert_eq!(session.fader_adjustments[ID].anchor_offset_db, -2.0);
    }

    #[test]
    fn test_anchor_never_matches_silent_track() {
        let mut session = Session::new(
            vec![
                planned("vox_scratch.wav", None, 0.0, Classification::Silent),
                planned("vox.wav", None, 3.0, Classification::Sustained),
            ],
            Config::new(),
        );
        let post = PostSteps {
            fader: FaderSettings {
                anchor: Some("vox".into()),
                ..FaderSettings::default()
            },
            ..PostSteps::default()
        };
        post.fader_offsets(&mut session, ID);
        assert_relative_eq!(offset(&session, 0), 0.0);
        assert_relative_eq!(offset(&session, 1), 0.0);
    }

    #[test]
    fn test_zero_headroom_disables_rebalance() {
        let mut session = Session::new(vec![planned("a.wav", None, -20.0, Classification::Transient)], Config::new());
        let post = PostSteps {
            fader: FaderSettings {
                headroom_db: 0.0,
                ..FaderSettings::default()
            },
            ..PostSteps::default()
        };
        post.fader_offsets(&mut session, ID);
        assert_relative_eq!(offset(&session, 0), 20.0);
    }

    #[test]
    fn test_from_config_reads_session_keys() {
        let mut config = Config::new();
        config.set("anchor", "vox");
        config.set("fader_headroom_db", 4.0);
        config.set("gain_linked_groups", vec!["Drums".to_string()]);
        let post = PostSteps::from_config(&config).unwrap();
        assert_eq!(post.fader.anchor.as_deref(), Some("vox"));
        assert_eq!(post.fader.headroom_db, 4.0);
        assert_eq!(post.linked_groups, Some(vec!["Drums".to_string()]));
    }
}

//! Effects / daypart policy oracle (spec.md §4.7).
//!
//! The Conductor treats this module as an opaque collaborator: it calls
//! `pick_speed`, `pick_effects`, `pick_overlay_effects`, `pick_blend_mode`
//! and `build_filter_string`, and never inspects the resulting filter
//! strings. Tiers, weights, and daypart mood tables are carried over
//! verbatim from the pipeline's original effects catalog.
use rand::Rng;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub name: &'static str,
    pub filter: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Light,
    Medium,
    Heavy,
}

const LIGHT_EFFECTS: &[Effect] = &[
    Effect { name: "warm_shift", filter: "colorbalance=rs=0.15:gs=-0.05:bs=-0.1" },
    Effect { name: "cool_shift", filter: "colorbalance=rs=-0.1:gs=0.05:bs=0.15" },
    Effect { name: "high_saturation", filter: "eq=saturation=1.5" },
    Effect { name: "low_saturation", filter: "eq=saturation=0.6" },
    Effect { name: "hue_drift", filter: "hue=H=2*PI*t/10" },
    Effect { name: "vignette", filter: "vignette=PI/4" },
    Effect { name: "soft_blur", filter: "gblur=sigma=1.5" },
    Effect { name: "brightness_boost", filter: "eq=brightness=0.08:contrast=1.1" },
    Effect { name: "dark_contrast", filter: "eq=brightness=-0.05:contrast=1.3" },
    Effect { name: "slight_hue_rotate", filter: "hue=h=30" },
    Effect {
        name: "sepia",
        filter: "colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131",
    },
];

const MEDIUM_EFFECTS: &[Effect] = &[
    Effect { name: "frame_blend", filter: "tblend=all_mode=average" },
    Effect { name: "frame_blend_screen", filter: "tblend=all_mode=screen" },
    Effect { name: "rgba_shift", filter: "rgbashift=rh=-3:bh=3" },
    Effect { name: "film_grain", filter: "noise=alls=20:allf=t+u" },
    Effect { name: "cross_process", filter: "curves=preset=cross_process" },
    Effect { name: "vintage", filter: "curves=preset=vintage" },
    Effect { name: "negative", filter: "curves=preset=negative" },
    Effect { name: "chromatic_aberration", filter: "rgbashift=rh=5:rv=-2:bh=-5:bv=2" },
    Effect {
        name: "posterize",
        filter: "lutyuv=y='bitand(val,240)':u='bitand(val,240)':v='bitand(val,240)'",
    },
    Effect { name: "scan_lines", filter: "drawgrid=w=0:h=2:t=1:c=black@0.3" },
    Effect { name: "color_bleed", filter: "gblur=sigma=3,rgbashift=rh=8:bh=-8" },
    Effect { name: "red_channel", filter: "colorchannelmixer=rr=1:rg=0:rb=0:gg=0:bb=0" },
    Effect { name: "blue_channel", filter: "colorchannelmixer=rr=0:gg=0:bb=1:bg=0:br=0" },
];

const HEAVY_EFFECTS: &[Effect] = &[
    Effect { name: "edge_glow", filter: "edgedetect=low=0.1:high=0.3:mode=colormix" },
    Effect {
        name: "pixelate",
        filter: "scale=iw/8:ih/8:flags=neighbor,scale=iw*8:ih*8:flags=neighbor",
    },
    Effect { name: "psychedelic_hue", filter: "hue=H=2*PI*t/3:s=3" },
    Effect {
        name: "quad_mirror",
        filter: "crop=iw/2:ih/2:0:0,split[a][b];[a]hflip[c];[b][c]hstack,split[d][e];[d]vflip[f];[e][f]vstack",
    },
    Effect { name: "heavy_trails", filter: "tblend=all_mode=addition:all_opacity=0.7" },
    Effect { name: "solarize", filter: "lutyuv=y='if(gt(val,128),256-val,val)*2'" },
    Effect { name: "glitch", filter: "noise=alls=40:allf=t,rgbashift=rh=10:rv=5:bh=-10:bv=-3" },
    Effect {
        name: "deep_pixelate",
        filter: "scale=iw/16:ih/16:flags=neighbor,scale=iw*16:ih*16:flags=neighbor",
    },
];

/// Overlay-only effects pool. Empty for now, reserved for future use (the
/// original catalog keeps this slot but never populates it).
const OVERLAY_EFFECTS: &[Effect] = &[];

/// Effect pairs that clash and must never be chosen together.
const INCOMPATIBLE_PAIRS: &[(&str, &str)] = &[("edge_glow", "high_saturation")];

pub struct DaypartProfile {
    pub tier_weights: (f64, f64, f64),
    pub speed_range: (f64, f64),
    pub overlay_chance: f64,
    pub blend_modes: &'static [&'static str],
}

const DAYTIME: DaypartProfile = DaypartProfile {
    tier_weights: (0.60, 0.30, 0.10),
    speed_range: (0.85, 1.0),
    overlay_chance: 0.40,
    blend_modes: &["screen", "addition", "softlight"],
};

const NIGHTTIME: DaypartProfile = DaypartProfile {
    tier_weights: (0.25, 0.40, 0.35),
    speed_range: (1.5, 2.2),
    overlay_chance: 0.50,
    blend_modes: &["multiply", "overlay", "softlight", "screen"],
};

const OVERNIGHT: DaypartProfile = DaypartProfile {
    tier_weights: (0.15, 0.30, 0.55),
    speed_range: (1.5, 2.5),
    overlay_chance: 0.55,
    blend_modes: &["difference", "hardlight", "exclusion", "multiply"],
};

const DEFAULT: DaypartProfile = DaypartProfile {
    tier_weights: (0.50, 0.35, 0.15),
    speed_range: (0.9, 1.1),
    overlay_chance: 0.40,
    blend_modes: &["screen", "overlay", "softlight"],
};

fn profile_for(daypart: Option<&str>) -> &'static DaypartProfile {
    match daypart {
        Some("daytime") => &DAYTIME,
        Some("nighttime") => &NIGHTTIME,
        Some("overnight") => &OVERNIGHT,
        _ => &DEFAULT,
    }
}

/// Pick a PTS-multiplier speed in the daypart's configured range, rounded
/// to 2 decimals (spec.md §4.7). >1.0 plays slower, <1.0 plays faster.
pub fn pick_speed(rng: &mut impl Rng, daypart: Option<&str>) -> f64 {
    let profile = profile_for(daypart);
    let (low, high) = profile.speed_range;
    let raw = rng.gen_range(low..=high);
    (raw * 100.0).round() / 100.0
}

/// Return true if this clip should be composited from two sources, drawn
/// against the daypart's overlay probability.
pub fn should_overlay(rng: &mut impl Rng, daypart: Option<&str>) -> bool {
    rng.gen::<f64>() < profile_for(daypart).overlay_chance
}

/// Pick a blend mode from the daypart's permitted palette.
pub fn pick_blend_mode(rng: &mut impl Rng, daypart: Option<&str>) -> String {
    let modes = profile_for(daypart).blend_modes;
    modes[rng.gen_range(0..modes.len())].to_string()
}

/// Pick 1-3 effects obeying daypart tier weights and the hard caps of at
/// most two medium and at most one heavy effect per clip, suppressing
/// incompatible pairs (spec.md §4.7).
pub fn pick_effects(rng: &mut impl Rng, min_count: u32, max_count: u32, daypart: Option<&str>) -> Vec<Effect> {
    let profile = profile_for(daypart);
    let light_w = profile.tier_weights.0;
    let medium_threshold = light_w + profile.tier_weights.1;

    let count = if max_count > min_count {
        rng.gen_range(min_count..=max_count)
    } else {
        min_count
    };

    let mut chosen = Vec::new();
    let mut chosen_names: HashSet<&'static str> = HashSet::new();
    let mut medium_count = 0u32;
    let mut heavy_count = 0u32;

    for _ in 0..count {
        let roll: f64 = rng.gen();
        let mut tier = if roll < light_w {
            Tier::Light
        } else if roll < medium_threshold {
            Tier::Medium
        } else {
            Tier::Heavy
        };

        if tier == Tier::Medium && medium_count >= 2 {
            tier = Tier::Light;
        } else if tier == Tier::Heavy && heavy_count >= 1 {
            tier = if medium_count < 2 { Tier::Medium } else { Tier::Light };
        }

        let pool = match tier {
            Tier::Light => LIGHT_EFFECTS,
            Tier::Medium => MEDIUM_EFFECTS,
            Tier::Heavy => HEAVY_EFFECTS,
        };

        let mut blocked: HashSet<&'static str> = HashSet::new();
        for (a, b) in INCOMPATIBLE_PAIRS {
            if chosen_names.contains(a) {
                blocked.insert(b);
            }
            if chosen_names.contains(b) {
                blocked.insert(a);
            }
        }

        let eligible: Vec<&Effect> = pool.iter().filter(|e| !blocked.contains(e.name)).collect();
        let pool_to_use: Vec<&Effect> = if eligible.is_empty() { pool.iter().collect() } else { eligible };

        let effect = *pool_to_use[rng.gen_range(0..pool_to_use.len())];
        chosen_names.insert(effect.name);
        chosen.push(effect);

        match tier {
            Tier::Medium => medium_count += 1,
            Tier::Heavy => heavy_count += 1,
            Tier::Light => {}
        }
    }

    chosen
}

/// Pick effects for an overlay clip. Constrained the same way as
/// [`pick_effects`], with a 30% chance to append an overlay-only effect.
pub fn pick_overlay_effects(rng: &mut impl Rng, min_count: u32, max_count: u32, daypart: Option<&str>) -> Vec<Effect> {
    let mut effects = pick_effects(rng, min_count, max_count, daypart);
    if !OVERLAY_EFFECTS.is_empty() && rng.gen::<f64>() < 0.30 {
        effects.push(OVERLAY_EFFECTS[rng.gen_range(0..OVERLAY_EFFECTS.len())]);
    }
    effects
}

/// Build a comma-joined filter chain suitable for direct insertion into the
/// Renderer's video filter graph.
pub fn build_filter_string(effects: &[Effect]) -> String {
    effects.iter().map(|e| e.filter).collect::<Vec<_>>().join(",")
}

/// Effect names for logging.
pub fn effect_names(effects: &[Effect]) -> Vec<&'static str> {
    effects.iter().map(|e| e.name).collect()
}

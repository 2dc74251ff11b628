//! Resolves each parsed [`Function`] to a `(Script, starting line)` pair
//! and folds its counts and times into the Script's lines.

use log::{debug, error, warn};

use super::function::Function;
use super::parser::Profile;
use super::script::Script;
use super::{classify, combine_time};

/// Runs the fixed-point resolution loop over `pending`, folding every
/// Function that resolves into its Script. A Function for which no
/// candidate was found at all is retried on the next pass (a later pass may
/// have grown the name index via another Function's fold); a Function that
/// resolves but fails to fold (script too short, continuation mismatch) is
/// dropped immediately, since nothing about a later pass changes that
/// outcome for a fixed `(Script, start)` pair.
pub fn map_functions(profile: &mut Profile, mut pending: Vec<Function>) {
    loop {
        let before = pending.len();
        let mut retry = Vec::with_capacity(pending.len());
        for f in pending {
            match resolve_function(profile, &f) {
                Some((idx, start)) => {
                    fold_function(profile, idx, start, &f);
                }
                None => retry.push(f),
            }
        }
        pending = retry;
        if pending.len() == before {
            break;
        }
    }

    for f in &pending {
        error!("Could not find source for function: {}", f.name);
    }
}

fn resolve_function(profile: &mut Profile, f: &Function) -> Option<(usize, u32)> {
    if let Some(declared) = f.declared.clone() {
        let idx = profile.script_index(&declared.script_path)?;
        return Some((idx, declared.line));
    }
    if f.is_anonymous() {
        resolve_anonymous(profile, f)
    } else {
        resolve_named(profile, f)
    }
}

fn resolve_named(profile: &Profile, f: &Function) -> Option<(usize, u32)> {
    let key = classify::strip_snr_prefix(&f.name);
    let mut found = Vec::new();
    for (idx, script) in profile.scripts.iter().enumerate() {
        if let Some(lnums) = script.func_to_lnums.get(&key) {
            for &lnum in lnums {
                if body_matches(script, lnum, f) {
                    found.push((idx, lnum));
                }
            }
        }
    }
    if found.is_empty() {
        return None;
    }
    if found.len() > 1 {
        warn!("multiple candidate scripts for function {}", f.name);
    }
    Some(found[0])
}

fn resolve_anonymous(profile: &mut Profile, f: &Function) -> Option<(usize, u32)> {
    if let Some(&cached) = profile.anon_cache.get(&f.name) {
        return Some(cached);
    }

    let mut found = Vec::new();
    for (idx, script) in profile.scripts.iter().enumerate() {
        for &lnum in &script.dict_functions {
            if body_matches(script, lnum, f) {
                found.push((idx, lnum));
            }
        }
    }
    if found.is_empty() {
        return None;
    }
    if found.len() > 1 {
        warn!("multiple candidate scripts for anonymous function {}", f.name);
    }

    for &(idx, lnum) in &found {
        if profile.scripts[idx].mapped_dict_functions.contains(&lnum) {
            debug!(
                "dict function site {}:{lnum} already mapped, skipping",
                profile.scripts[idx].path
            );
            continue;
        }
        profile.scripts[idx].mapped_dict_functions.insert(lnum);
        profile.anon_cache.insert(f.name.clone(), (idx, lnum));
        return Some((idx, lnum));
    }

    // Every candidate site was already consumed; fall back to the first
    // (mirrors the "multiple candidates" tie-break above).
    Some(found[0])
}

/// True iff every `(f_lnum, f_line)` in `f` resolves to some Script line,
/// in order, with a moving cursor (see [`resolve_body`]).
fn body_matches(script: &Script, start: u32, f: &Function) -> bool {
    resolve_body(script, start, f).is_ok()
}

/// Why a single body line failed to resolve against the script, for the
/// two distinct §7 warnings `fold_function` logs.
enum BodyMismatch {
    /// No script line at all at the computed position.
    Missing(u32),
    /// A script line exists but neither it nor its continuation chain
    /// joins to the function's text.
    Mismatch(u32),
}

/// Resolves every `(f_lnum, f_line)` in `f` to the Script line it actually
/// covers, returning `(f_lnum, s_lnum)` pairs in body order.
///
/// `start` is fixed once chosen (per §9) and never adjusted; what moves is
/// a separate `shift` cursor carried across `f_lnum` iterations. A body
/// line may be satisfied by joining one or more of the Script's
/// continuation lines starting at `start + f_lnum + shift`; each
/// continuation line consumed there belongs to *this* body line and must
/// not be matched against again, so every following body line's
/// `s_lnum` is pushed forward by however many continuation lines the
/// earlier ones consumed. A fixed `start + f_lnum` offset (no shift)
/// only matches bodies whose continuations are all trailing; an interior
/// continuation — one consumed by an earlier body line — requires this
/// cursor to avoid re-checking the continuation line itself as if it were
/// the next body line.
fn resolve_body(
    script: &Script,
    start: u32,
    f: &Function,
) -> Result<Vec<(u32, u32)>, BodyMismatch> {
    let mut shift: u32 = 0;
    let mut positions = Vec::with_capacity(f.lines.len());
    for (&f_lnum, f_line) in &f.lines {
        let s_lnum = start + f_lnum + shift;
        let extra = continuation_match_len(script, s_lnum, &f_line.text)
            .ok_or_else(|| match script.lines.get(&s_lnum) {
                None => BodyMismatch::Missing(s_lnum),
                Some(_) => BodyMismatch::Mismatch(s_lnum),
            })?;
        positions.push((f_lnum, s_lnum));
        shift += extra;
    }
    Ok(positions)
}

/// If the Script's line at `s_lnum` (after joining however many successive
/// continuation lines are needed) equals `target`, returns how many
/// continuation lines were consumed; `None` if no join of the available
/// continuation chain matches.
fn continuation_match_len(script: &Script, s_lnum: u32, target: &str) -> Option<u32> {
    let s_line = script.lines.get(&s_lnum)?;
    let mut joined = s_line.text.clone();
    let mut cursor = s_lnum;
    let mut extra = 0u32;
    loop {
        if joined == target {
            return Some(extra);
        }
        let peek = script.lines.get(&(cursor + 1))?;
        let prefix_len = classify::continuation_prefix_len(&peek.text)?;
        joined.push_str(&peek.text[prefix_len..]);
        cursor += 1;
        extra += 1;
    }
}

/// Folds `f`'s per-line counts and times into `profile.scripts[idx]`,
/// resolving each body line's actual script line via [`resolve_body`]
/// (validated before any mutation, so a mismatch leaves the Script
/// untouched) and logging/abandoning on `ScriptLineMissingDuringFold` /
/// `ContinuationMismatch`.
fn fold_function(profile: &mut Profile, idx: usize, start: u32, f: &Function) {
    let positions = match resolve_body(&profile.scripts[idx], start, f) {
        Ok(positions) => positions,
        Err(BodyMismatch::Missing(s_lnum)) => {
            warn!(
                "script {:?} has no line {s_lnum} while folding function {}",
                profile.scripts[idx].path, f.name
            );
            return;
        }
        Err(BodyMismatch::Mismatch(s_lnum)) => {
            warn!(
                "continuation text in {:?} at line {s_lnum} does not match function {}",
                profile.scripts[idx].path, f.name
            );
            return;
        }
    };

    let script = &mut profile.scripts[idx];
    for (f_lnum, s_lnum) in positions {
        let f_line = &f.lines[&f_lnum];

        if let Some(count) = f_line.count {
            let new_count = {
                let s_line = script.lines.get_mut(&s_lnum).unwrap();
                let updated = s_line.count.unwrap_or(0) + count;
                s_line.count = Some(updated);
                updated
            };

            let mut i = s_lnum + 1;
            while let Some(next_line) = script.lines.get(&i) {
                if classify::is_continuation(&next_line.text) {
                    script.lines.get_mut(&i).unwrap().count = Some(new_count);
                    i += 1;
                } else {
                    break;
                }
            }

            script.record_function_header(s_lnum, &f_line.text);
        }

        if f_line.self_time.is_some() || f_line.total_time.is_some() {
            let s_line = script.lines.get_mut(&s_lnum).unwrap();
            s_line.self_time = combine_time(s_line.self_time, f_line.self_time);
            s_line.total_time = combine_time(s_line.total_time, f_line.total_time);
        }
    }
}

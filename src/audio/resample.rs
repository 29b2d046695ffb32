//! Linear-interpolation sample-rate conversion.
//!
//! Speech into and out of the agent tolerates the aliasing a plain linear
//! interpolator introduces, and it has no lookahead, so there is no filter stage.

/// Convert `input` from `source_rate` to `target_rate`.
///
/// Output length is `floor(len / ratio)` with `ratio = source_rate / target_rate`.
/// Output sample `i` blends `input[floor(i * ratio)]` and the following sample
/// (clamped to the last index) by the fractional part, so every output value
/// stays within the input's range. Equal rates return the input unchanged.
pub fn resample(input: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    // Guard rails
    if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
        return input.to_vec();
    }
    if input.is_empty() {
        return Vec::new();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);
    let output_len = (input.len() as f64 / ratio).floor() as usize;
    let last = input.len() - 1;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_index = i as f64 * ratio;
        let lower = (src_index.floor() as usize).min(last);
        let upper = (lower + 1).min(last);
        let t = (src_index - lower as f64) as f32;
        let (a, b) = (input[lower], input[upper]);
        output.push(bounded_lerp(a, b, t));
    }

    output
}

// Float rounding can push a blend one ulp outside [a, b]; pin it back.
// Written without `clamp` so NaN input passes through instead of panicking.
fn bounded_lerp(a: f32, b: f32, t: f32) -> f32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let value = a + (b - a) * t;
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

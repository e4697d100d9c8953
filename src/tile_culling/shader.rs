//! WGSL source of the tile culling kernel

/// Entry point `cull_tiles`, one 8x8 workgroup per tile.
///
/// Bindings follow the `BINDING_*` constants in [`super`]. The append into a
/// tile record checks capacity before claiming a slot, so a full tile never
/// writes past its own record.
pub const TILE_LIGHT_CULLING_SHADER: &str = r#"
struct TileCullingUniforms {
    view: mat4x4<f32>,
    near_bottom_left: vec4<f32>,
    tile_footprint: vec4<f32>,
    depth_params: vec4<f32>,
    grid: vec4<u32>,
    buffer_size: vec4<u32>,
    flags: vec4<u32>,
}

struct CullingLight {
    bound: vec4<f32>,
    axis_angle: vec4<f32>,
}

@group(0) @binding(0) var<uniform> uniforms: TileCullingUniforms;
@group(0) @binding(1) var<storage, read> lights: array<CullingLight>;
@group(0) @binding(2) var<storage, read_write> light_tiles: array<u32>;
@group(0) @binding(3) var<storage, read> probes: array<CullingLight>;
@group(0) @binding(4) var<storage, read_write> probe_tiles: array<u32>;
@group(0) @binding(5) var depth_texture: texture_depth_2d;

const WORKGROUP_THREADS: u32 = 64u;

var<workgroup> tile_min_depth: atomic<u32>;
var<workgroup> tile_max_depth: atomic<u32>;
var<workgroup> tile_light_count: atomic<u32>;
var<workgroup> tile_probe_count: atomic<u32>;

fn linearize_depth(depth: f32) -> f32 {
    let denom = uniforms.depth_params.x * depth + uniforms.depth_params.y;
    if (abs(denom) <= 1.1920929e-7) {
        return uniforms.depth_params.w;
    }
    return 1.0 / denom;
}

struct TileFrustum {
    left: vec3<f32>,
    right: vec3<f32>,
    bottom: vec3<f32>,
    top: vec3<f32>,
    min_depth: f32,
    max_depth: f32,
    sphere: vec4<f32>,
}

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    if (len > 0.0) {
        return v / len;
    }
    return vec3<f32>(0.0);
}

fn build_frustum(tile: vec2<u32>, min_depth: f32, max_depth: f32) -> TileFrustum {
    let bottom_left = uniforms.near_bottom_left;
    let footprint = uniforms.tile_footprint;
    let near = -bottom_left.z;

    // Tile rows count down from the top edge of the screen
    let x0 = bottom_left.x + f32(tile.x) * footprint.x;
    let x1 = x0 + footprint.x;
    let y_top = -bottom_left.y - f32(tile.y) * footprint.y;
    let y_bottom = y_top - footprint.y;

    var frustum: TileFrustum;
    frustum.left = safe_normalize(vec3<f32>(near, 0.0, x0));
    frustum.right = safe_normalize(vec3<f32>(-near, 0.0, -x1));
    frustum.bottom = safe_normalize(vec3<f32>(0.0, near, y_bottom));
    frustum.top = safe_normalize(vec3<f32>(0.0, -near, -y_top));
    frustum.min_depth = min_depth;
    frustum.max_depth = max_depth;

    var corners: array<vec3<f32>, 8>;
    var i = 0u;
    for (var d = 0u; d < 2u; d++) {
        let depth = select(min_depth, max_depth, d == 1u);
        let scale = depth / near;
        for (var xi = 0u; xi < 2u; xi++) {
            let x = select(x0, x1, xi == 1u);
            for (var yi = 0u; yi < 2u; yi++) {
                let y = select(y_bottom, y_top, yi == 1u);
                corners[i] = vec3<f32>(x * scale, y * scale, -depth);
                i++;
            }
        }
    }
    var center = vec3<f32>(0.0);
    for (var c = 0u; c < 8u; c++) {
        center += corners[c];
    }
    center /= 8.0;
    var radius = 0.0;
    for (var c = 0u; c < 8u; c++) {
        radius = max(radius, distance(corners[c], center));
    }
    frustum.sphere = vec4<f32>(center, radius);
    return frustum;
}

fn sphere_in_frustum(frustum: TileFrustum, center: vec3<f32>, radius: f32) -> bool {
    if (dot(frustum.left, center) < -radius || dot(frustum.right, center) < -radius ||
        dot(frustum.bottom, center) < -radius || dot(frustum.top, center) < -radius) {
        return false;
    }
    let depth = -center.z;
    return !(depth + radius < frustum.min_depth || depth - radius > frustum.max_depth);
}

fn cone_intersects_sphere(origin: vec3<f32>, axis: vec3<f32>, range: f32, half_angle: f32, sphere: vec4<f32>) -> bool {
    let v = sphere.xyz - origin;
    let v_len_sq = dot(v, v);
    let v1_len = dot(v, axis);
    let closest = cos(half_angle) * sqrt(max(v_len_sq - v1_len * v1_len, 0.0)) - v1_len * sin(half_angle);

    let angle_cull = closest > sphere.w;
    let front_cull = v1_len > sphere.w + range;
    let back_cull = v1_len < -sphere.w;
    return !(angle_cull || front_cull || back_cull);
}

fn touches_tile(frustum: TileFrustum, item: CullingLight) -> bool {
    let center = (uniforms.view * vec4<f32>(item.bound.xyz, 1.0)).xyz;
    let radius = item.bound.w;
    if (!sphere_in_frustum(frustum, center, radius)) {
        return false;
    }
    if (item.axis_angle.w < 0.0) {
        return true;
    }
    let axis = safe_normalize((uniforms.view * vec4<f32>(item.axis_angle.xyz, 0.0)).xyz);
    return cone_intersects_sphere(center, axis, radius, item.axis_angle.w, frustum.sphere);
}

fn append_light(index: u32, base: u32, capacity: u32) {
    var current = atomicLoad(&tile_light_count);
    loop {
        if (current >= capacity) {
            return;
        }
        let result = atomicCompareExchangeWeak(&tile_light_count, current, current + 1u);
        if (result.exchanged) {
            let slot = base + 1u + current;
            if (slot < arrayLength(&light_tiles)) {
                light_tiles[slot] = index;
            }
            return;
        }
        current = result.old_value;
    }
}

fn append_probe(index: u32, base: u32, capacity: u32) {
    var current = atomicLoad(&tile_probe_count);
    loop {
        if (current >= capacity) {
            return;
        }
        let result = atomicCompareExchangeWeak(&tile_probe_count, current, current + 1u);
        if (result.exchanged) {
            let slot = base + 1u + current;
            if (slot < arrayLength(&probe_tiles)) {
                probe_tiles[slot] = index;
            }
            return;
        }
        current = result.old_value;
    }
}

@compute @workgroup_size(8, 8, 1)
fn cull_tiles(
    @builtin(workgroup_id) workgroup_id: vec3<u32>,
    @builtin(local_invocation_id) local_id: vec3<u32>,
    @builtin(local_invocation_index) local_index: u32,
) {
    let tile = workgroup_id.xy;
    let tile_index = tile.y * uniforms.grid.x + tile.x;
    let per_tile = uniforms.grid.w;
    let capacity = per_tile - 1u;
    let base = tile_index * per_tile;
    let near = -uniforms.near_bottom_left.z;
    let far = uniforms.near_bottom_left.w;
    let split_depth = uniforms.flags.x != 0u && uniforms.flags.y != 0u;

    if (local_index == 0u) {
        atomicStore(&tile_min_depth, 0x7f7fffffu);
        atomicStore(&tile_max_depth, 0u);
        atomicStore(&tile_light_count, 0u);
        atomicStore(&tile_probe_count, 0u);
    }
    workgroupBarrier();

    // Linear depths are positive, so their bit patterns order like the floats
    if (split_depth) {
        let tile_size = uniforms.grid.z;
        let origin = tile * tile_size;
        let end = min(origin + vec2<u32>(tile_size), uniforms.buffer_size.xy);
        for (var y = origin.y + local_id.y; y < end.y; y += 8u) {
            for (var x = origin.x + local_id.x; x < end.x; x += 8u) {
                let device = textureLoad(depth_texture, vec2<i32>(i32(x), i32(y)), 0);
                let view_depth = clamp(linearize_depth(device), near, far);
                atomicMin(&tile_min_depth, bitcast<u32>(view_depth));
                atomicMax(&tile_max_depth, bitcast<u32>(view_depth));
            }
        }
    }
    workgroupBarrier();

    var min_depth = near;
    var max_depth = far;
    let min_bits = atomicLoad(&tile_min_depth);
    let max_bits = atomicLoad(&tile_max_depth);
    if (split_depth && bitcast<f32>(min_bits) <= bitcast<f32>(max_bits)) {
        min_depth = bitcast<f32>(min_bits);
        max_depth = bitcast<f32>(max_bits);
    }
    let frustum = build_frustum(tile, min_depth, max_depth);

    // A record that does not fit in the output is skipped as a whole
    let light_record_fits = base + per_tile <= arrayLength(&light_tiles);
    let probe_record_fits = uniforms.flags.z != 0u && base + per_tile <= arrayLength(&probe_tiles);

    let light_count = select(0u, min(uniforms.buffer_size.z, arrayLength(&lights)), light_record_fits);
    for (var i = local_index; i < light_count; i += WORKGROUP_THREADS) {
        if (touches_tile(frustum, lights[i])) {
            append_light(i, base, capacity);
        }
    }

    let probe_count = select(0u, min(uniforms.buffer_size.w, arrayLength(&probes)), probe_record_fits);
    for (var i = local_index; i < probe_count; i += WORKGROUP_THREADS) {
        if (touches_tile(frustum, probes[i])) {
            append_probe(i, base, capacity);
        }
    }
    workgroupBarrier();

    if (local_index == 0u) {
        if (light_record_fits) {
            light_tiles[base] = atomicLoad(&tile_light_count);
        }
        if (probe_record_fits) {
            probe_tiles[base] = atomicLoad(&tile_probe_count);
        }
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::ComputeKernel;

    #[test]
    fn shader_exposes_kernel_entry_point() {
        let entry = format!("fn {}(", ComputeKernel::TileLightCulling.entry_point());
        assert!(TILE_LIGHT_CULLING_SHADER.contains(&entry));
        assert!(TILE_LIGHT_CULLING_SHADER.contains("@workgroup_size(8, 8, 1)"));
    }
}

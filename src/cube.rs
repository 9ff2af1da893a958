//! Image cube engine: random-access N-dimensional float storage.
//!
//! A cube is a dataset whose `image` item holds 32-bit floats behind the
//! 4-byte real type tag, first axis fastest (so a pixel at `coords` lives at
//! linear index `sum(coords[i] * stride[i])` with `stride[0] == 1`). Axis
//! lengths are persisted as the `naxis`, `naxis1..naxisN` integer headers.
//! Per-pixel flags live in the `mask` item, one bit per pixel in the same
//! linear order; a missing mask item means every pixel is good.
//!
//! Two access styles coexist, as in the classic planar/arbitrary split:
//! whole-plane and row-within-plane operations against a current plane, and
//! sub-cube views established by [`ImageCube::setup`] that remap virtual
//! linear indices onto an arbitrary blc/trc region with a caller-chosen
//! axis ordering. All coordinates are zero-based.

use crate::dataset::{AccessMode, Dataset};
use crate::error::{MiriadError, Result};
use crate::item::{Item, ItemMode};
use crate::mask::{MaskEncoding, MaskItem};
use crate::types::TypeTag;

/// Most axes a cube may carry.
pub const MAX_AXES: usize = 7;

const IMAGE_ITEM: &str = "image";
const MASK_ITEM: &str = "mask";
const DATA_START: u64 = 4;

/// Axis letters accepted by sub-cube specifications, axis 0 first.
const AXIS_CHARS: [char; MAX_AXES] = ['x', 'y', 'z', 'a', 'b', 'c', 'd'];

/// Sub-cube coordinate remapping established by [`ImageCube::setup`].
struct SubcubeView {
    /// Physical axis numbers in virtual order: varying axes first, in the
    /// order the caller named them, then the fixed axes ascending.
    order: Vec<usize>,
    n_varying: usize,
    blc: Vec<usize>,
    trc: Vec<usize>,
    /// Virtual axis lengths, in `order`.
    viraxlen: Vec<usize>,
    /// Cumulative products of `viraxlen`.
    vircubesize: Vec<usize>,
}

impl SubcubeView {
    /// Pixels within one sub-cube.
    fn subcube_len(&self) -> usize {
        if self.n_varying == 0 {
            1
        } else {
            self.vircubesize[self.n_varying - 1]
        }
    }

    /// Number of distinct sub-cubes in the view.
    fn n_subcubes(&self) -> usize {
        self.viraxlen[self.n_varying..].iter().product()
    }
}

/// Open session on one image cube.
pub struct ImageCube {
    dataset: Dataset,
    image: Item,
    mask: Option<MaskItem>,
    axes: Vec<usize>,
    strides: Vec<u64>,
    /// Coordinates along axes 2.. selecting the current plane.
    plane: Vec<usize>,
    view: Option<SubcubeView>,
}

fn strides_for(axes: &[usize]) -> Vec<u64> {
    let mut strides = Vec::with_capacity(axes.len());
    let mut acc = 1u64;
    for &len in axes {
        strides.push(acc);
        acc *= len as u64;
    }
    strides
}

impl ImageCube {
    /// Open or create an image cube. For `New`, `axes` fixes the axis
    /// lengths; for `Old` it is ignored and the persisted lengths are
    /// returned. The second element of the result is the axis count.
    pub fn open<P: AsRef<std::path::Path>>(
        path: P,
        mode: AccessMode,
        axes: &[usize],
    ) -> Result<(Self, usize)> {
        match mode {
            AccessMode::New => {
                if axes.is_empty() || axes.len() > MAX_AXES {
                    return Err(MiriadError::validation(format!(
                        "cube must have 1..={MAX_AXES} axes, got {}",
                        axes.len()
                    )));
                }
                if axes.iter().any(|&len| len == 0) {
                    return Err(MiriadError::validation("cube axes must be nonzero"));
                }
                let dataset = Dataset::open(path, AccessMode::New)?;
                dataset.write_header_int("naxis", axes.len() as i32)?;
                for (i, &len) in axes.iter().enumerate() {
                    dataset.write_header_int(&format!("naxis{}", i + 1), len as i32)?;
                }
                let mut image = dataset.access(IMAGE_ITEM, ItemMode::Write)?;
                image.write(&[TypeTag::Real32.code()], 0)?;
                let naxis = axes.len();
                tracing::debug!(naxis, "created image cube");
                Ok((
                    ImageCube {
                        dataset,
                        image,
                        mask: None,
                        axes: axes.to_vec(),
                        strides: strides_for(axes),
                        plane: vec![0; naxis.saturating_sub(2)],
                        view: None,
                    },
                    naxis,
                ))
            }
            AccessMode::Old | AccessMode::Append => {
                let dataset = Dataset::open(path, AccessMode::Old)?;
                let naxis = dataset.read_header_int("naxis", 0)? as usize;
                if naxis == 0 || naxis > MAX_AXES {
                    return Err(MiriadError::fault(format!(
                        "dataset carries invalid naxis {naxis}"
                    )));
                }
                let mut axes = Vec::with_capacity(naxis);
                for i in 0..naxis {
                    let len = dataset.read_header_int(&format!("naxis{}", i + 1), 0)?;
                    if len <= 0 {
                        return Err(MiriadError::fault(format!(
                            "axis {} has invalid length {len}",
                            i + 1
                        )));
                    }
                    axes.push(len as usize);
                }
                let mut image = dataset.access(IMAGE_ITEM, ItemMode::Append)?;
                let mut tag = [0i32];
                image.read(&mut tag, 0)?;
                if tag[0] != TypeTag::Real32.code() {
                    return Err(MiriadError::fault(format!(
                        "image item carries type code {}, not real",
                        tag[0]
                    )));
                }
                let mask = if dataset.has_item(MASK_ITEM) {
                    Some(MaskItem::open(&dataset, MASK_ITEM, ItemMode::Append)?)
                } else {
                    None
                };
                Ok((
                    ImageCube {
                        dataset,
                        image,
                        mask,
                        strides: strides_for(&axes),
                        plane: vec![0; naxis.saturating_sub(2)],
                        axes,
                        view: None,
                    },
                    naxis,
                ))
            }
        }
    }

    pub fn axes(&self) -> &[usize] {
        &self.axes
    }

    pub fn naxis(&self) -> usize {
        self.axes.len()
    }

    /// The dataset backing this cube, for header and history access.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn npixels(&self) -> u64 {
        self.axes.iter().map(|&len| len as u64).product()
    }

    fn plane_len(&self) -> Result<usize> {
        if self.axes.len() < 2 {
            return Err(MiriadError::validation(
                "plane operations need a cube of at least 2 axes",
            ));
        }
        Ok(self.axes[0] * self.axes[1])
    }

    fn n_planes(&self) -> usize {
        self.axes[2..].iter().product()
    }

    fn mask_for_write(&mut self) -> Result<&mut MaskItem> {
        if self.mask.is_none() {
            self.mask = Some(MaskItem::open(&self.dataset, MASK_ITEM, ItemMode::Write)?);
        }
        Ok(self.mask.as_mut().unwrap())
    }

    fn read_pixels(&mut self, pixel_offset: u64, buf: &mut [f32]) -> Result<()> {
        // Unwritten regions of a fresh cube read as zero fill up to the
        // declared cube size, matching write-anywhere planar access.
        let have = (self.image.size().saturating_sub(DATA_START) / 4).min(self.npixels());
        let end = pixel_offset + buf.len() as u64;
        if end > self.npixels() {
            return Err(MiriadError::validation(format!(
                "pixel range {pixel_offset}..{end} exceeds cube size {}",
                self.npixels()
            )));
        }
        let n_stored = have.saturating_sub(pixel_offset).min(buf.len() as u64) as usize;
        if n_stored > 0 {
            self.image.read(&mut buf[..n_stored], 1 + pixel_offset)?;
        }
        buf[n_stored..].fill(0.0);
        Ok(())
    }

    fn write_pixels(&mut self, pixel_offset: u64, values: &[f32]) -> Result<()> {
        let end = pixel_offset + values.len() as u64;
        if end > self.npixels() {
            return Err(MiriadError::validation(format!(
                "pixel range {pixel_offset}..{end} exceeds cube size {}",
                self.npixels()
            )));
        }
        self.image.write(values, 1 + pixel_offset)
    }

    fn read_flags(&mut self, pixel_offset: u64, buf: &mut [i32]) -> Result<()> {
        match &mut self.mask {
            None => {
                buf.fill(1);
                Ok(())
            }
            Some(mask) => {
                let n = mask.read(MaskEncoding::Expanded, pixel_offset, buf.len(), buf)?;
                // Bits beyond the stored words are unwritten pixels: good.
                buf[n..].fill(1);
                Ok(())
            }
        }
    }

    fn write_flags(&mut self, pixel_offset: u64, flags: &[i32]) -> Result<()> {
        let npixels = self.npixels();
        if pixel_offset + flags.len() as u64 > npixels {
            return Err(MiriadError::validation("flag range exceeds cube size"));
        }
        let mask = self.mask_for_write()?;
        mask.write(MaskEncoding::Expanded, pixel_offset, flags.len(), flags)
    }

    // Planar access

    fn plane_offset(&self, index: usize) -> Result<u64> {
        let plane_len = self.plane_len()?;
        if index >= self.n_planes() {
            return Err(MiriadError::validation(format!(
                "plane {index} out of range ({} planes)",
                self.n_planes()
            )));
        }
        Ok(index as u64 * plane_len as u64)
    }

    /// Read the 2-D plane `index` (trailing axes flattened, row-major
    /// within the plane).
    pub fn read_plane(&mut self, index: usize, buf: &mut [f32]) -> Result<()> {
        let plane_len = self.plane_len()?;
        if buf.len() < plane_len {
            return Err(MiriadError::BufferTooSmall {
                needed: plane_len,
                capacity: buf.len(),
            });
        }
        let offset = self.plane_offset(index)?;
        self.read_pixels(offset, &mut buf[..plane_len])
    }

    pub fn write_plane(&mut self, index: usize, data: &[f32]) -> Result<()> {
        let plane_len = self.plane_len()?;
        if data.len() < plane_len {
            return Err(MiriadError::BufferTooSmall {
                needed: plane_len,
                capacity: data.len(),
            });
        }
        let offset = self.plane_offset(index)?;
        self.write_pixels(offset, &data[..plane_len])
    }

    pub fn read_plane_flags(&mut self, index: usize, buf: &mut [i32]) -> Result<()> {
        let plane_len = self.plane_len()?;
        if buf.len() < plane_len {
            return Err(MiriadError::BufferTooSmall {
                needed: plane_len,
                capacity: buf.len(),
            });
        }
        let offset = self.plane_offset(index)?;
        self.read_flags(offset, &mut buf[..plane_len])
    }

    pub fn write_plane_flags(&mut self, index: usize, flags: &[i32]) -> Result<()> {
        let plane_len = self.plane_len()?;
        if flags.len() < plane_len {
            return Err(MiriadError::BufferTooSmall {
                needed: plane_len,
                capacity: flags.len(),
            });
        }
        let offset = self.plane_offset(index)?;
        self.write_flags(offset, &flags[..plane_len])
    }

    /// Select the current plane for the row operations: one coordinate per
    /// axis beyond the second.
    pub fn set_plane(&mut self, axis_values: &[usize]) -> Result<()> {
        self.plane_len()?;
        if axis_values.len() != self.axes.len() - 2 {
            return Err(MiriadError::validation(format!(
                "set_plane needs {} coordinates, got {}",
                self.axes.len() - 2,
                axis_values.len()
            )));
        }
        for (i, (&value, &len)) in axis_values.iter().zip(&self.axes[2..]).enumerate() {
            if value >= len {
                return Err(MiriadError::validation(format!(
                    "plane coordinate {value} out of range on axis {}",
                    i + 3
                )));
            }
        }
        self.plane = axis_values.to_vec();
        Ok(())
    }

    fn current_plane_index(&self) -> usize {
        let mut index = 0;
        for (&value, &len) in self.plane.iter().zip(&self.axes[2..]).rev() {
            index = index * len + value;
        }
        index
    }

    fn row_offset(&self, row: usize) -> Result<u64> {
        let plane_len = self.plane_len()? as u64;
        if row >= self.axes[1] {
            return Err(MiriadError::validation(format!(
                "row {row} out of range ({} rows)",
                self.axes[1]
            )));
        }
        Ok(self.current_plane_index() as u64 * plane_len + row as u64 * self.axes[0] as u64)
    }

    /// Read row `row` of the current plane.
    pub fn read_row(&mut self, row: usize, buf: &mut [f32]) -> Result<()> {
        let width = self.axes[0];
        if buf.len() < width {
            return Err(MiriadError::BufferTooSmall {
                needed: width,
                capacity: buf.len(),
            });
        }
        let offset = self.row_offset(row)?;
        self.read_pixels(offset, &mut buf[..width])
    }

    pub fn write_row(&mut self, row: usize, data: &[f32]) -> Result<()> {
        let width = self.axes[0];
        if data.len() < width {
            return Err(MiriadError::BufferTooSmall {
                needed: width,
                capacity: data.len(),
            });
        }
        let offset = self.row_offset(row)?;
        self.write_pixels(offset, &data[..width])
    }

    pub fn read_row_flags(&mut self, row: usize, buf: &mut [i32]) -> Result<()> {
        let width = self.axes[0];
        if buf.len() < width {
            return Err(MiriadError::BufferTooSmall {
                needed: width,
                capacity: buf.len(),
            });
        }
        let offset = self.row_offset(row)?;
        self.read_flags(offset, &mut buf[..width])
    }

    pub fn write_row_flags(&mut self, row: usize, flags: &[i32]) -> Result<()> {
        let width = self.axes[0];
        if flags.len() < width {
            return Err(MiriadError::BufferTooSmall {
                needed: width,
                capacity: flags.len(),
            });
        }
        let offset = self.row_offset(row)?;
        self.write_flags(offset, &flags[..width])
    }

    // Sub-cube access

    /// Establish a sub-cube view. `spec` names the axes that vary within a
    /// sub-cube (`x`..`d` for axes 1..7), in the order they should run;
    /// `blc`/`trc` bound the region, inclusive, one pair per axis. Returns
    /// the virtual axis lengths and their cumulative products.
    pub fn setup(
        &mut self,
        spec: &str,
        blc: &[usize],
        trc: &[usize],
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let naxis = self.axes.len();
        if blc.len() != naxis || trc.len() != naxis {
            return Err(MiriadError::validation(format!(
                "blc/trc must carry {naxis} coordinates"
            )));
        }
        for axis in 0..naxis {
            if blc[axis] > trc[axis] || trc[axis] >= self.axes[axis] {
                return Err(MiriadError::validation(format!(
                    "blc/trc [{}, {}] invalid on axis {} of length {}",
                    blc[axis], trc[axis], axis + 1, self.axes[axis]
                )));
            }
        }

        let mut varying = Vec::new();
        for ch in spec.chars() {
            let axis = AXIS_CHARS
                .iter()
                .position(|&c| c == ch.to_ascii_lowercase())
                .ok_or_else(|| {
                    MiriadError::validation(format!("unrecognized axis letter {ch:?}"))
                })?;
            if axis >= naxis {
                return Err(MiriadError::validation(format!(
                    "axis {ch:?} beyond this cube's {naxis} axes"
                )));
            }
            if varying.contains(&axis) {
                return Err(MiriadError::validation(format!(
                    "axis {ch:?} repeated in sub-cube spec"
                )));
            }
            varying.push(axis);
        }

        let mut order = varying.clone();
        for axis in 0..naxis {
            if !order.contains(&axis) {
                order.push(axis);
            }
        }

        let viraxlen: Vec<usize> = order.iter().map(|&p| trc[p] - blc[p] + 1).collect();
        let mut vircubesize = Vec::with_capacity(naxis);
        let mut acc = 1usize;
        for &len in &viraxlen {
            acc *= len;
            vircubesize.push(acc);
        }

        self.view = Some(SubcubeView {
            n_varying: varying.len(),
            order,
            blc: blc.to_vec(),
            trc: trc.to_vec(),
            viraxlen: viraxlen.clone(),
            vircubesize: vircubesize.clone(),
        });
        Ok((viraxlen, vircubesize))
    }

    fn view(&self) -> Result<&SubcubeView> {
        self.view
            .as_ref()
            .ok_or_else(|| MiriadError::validation("no sub-cube view established"))
    }

    /// Physical coordinates of the origin of sub-cube `index`.
    pub fn coords_to_subcube(&self, index: usize, coords: &mut [usize]) -> Result<()> {
        let view = self.view()?;
        let naxis = self.axes.len();
        if coords.len() != naxis {
            return Err(MiriadError::validation(format!(
                "coords must carry {naxis} values"
            )));
        }
        if index >= view.n_subcubes() {
            return Err(MiriadError::validation(format!(
                "sub-cube {index} out of range ({} sub-cubes)",
                view.n_subcubes()
            )));
        }
        let mut rest = index;
        for (k, &axis) in view.order.iter().enumerate() {
            if k < view.n_varying {
                coords[axis] = view.blc[axis];
            } else {
                let digit = rest % view.viraxlen[k];
                rest /= view.viraxlen[k];
                coords[axis] = view.blc[axis] + digit;
            }
        }
        Ok(())
    }

    /// Sub-cube number of the sub-cube whose origin lies at `coords`. The
    /// exact inverse of [`coords_to_subcube`](Self::coords_to_subcube).
    pub fn subcube_from_coords(&self, coords: &[usize]) -> Result<usize> {
        let view = self.view()?;
        let naxis = self.axes.len();
        if coords.len() != naxis {
            return Err(MiriadError::validation(format!(
                "coords must carry {naxis} values"
            )));
        }
        let mut index = 0;
        let mut weight = 1;
        for (k, &axis) in view.order.iter().enumerate() {
            if k < view.n_varying {
                continue;
            }
            let value = coords[axis];
            if value < view.blc[axis] || value > view.trc[axis] {
                return Err(MiriadError::validation(format!(
                    "coordinate {value} outside blc/trc on axis {}",
                    axis + 1
                )));
            }
            index += (value - view.blc[axis]) * weight;
            weight *= view.viraxlen[k];
        }
        Ok(index)
    }

    /// Physical pixel index for virtual pixel `v` of the view.
    fn virtual_to_physical(&self, v: usize) -> Result<u64> {
        let view = self.view()?;
        let total: usize = view.viraxlen.iter().product();
        if v >= total {
            return Err(MiriadError::validation(format!(
                "virtual pixel {v} out of range ({total} pixels)"
            )));
        }
        let mut rest = v;
        let mut offset = 0u64;
        for (k, &axis) in view.order.iter().enumerate() {
            let digit = rest % view.viraxlen[k];
            rest /= view.viraxlen[k];
            offset += (view.blc[axis] + digit) as u64 * self.strides[axis];
        }
        Ok(offset)
    }

    /// Transfer one whole sub-cube, reading. `coords` is the sub-cube
    /// origin as produced by [`coords_to_subcube`](Self::coords_to_subcube).
    /// Returns the number of pixels transferred.
    pub fn read_cube(
        &mut self,
        coords: &[usize],
        data: &mut [f32],
        mask: &mut [i32],
    ) -> Result<usize> {
        let index = self.subcube_from_coords(coords)?;
        let n = self.view()?.subcube_len();
        if data.len() < n || mask.len() < n {
            return Err(MiriadError::BufferTooSmall {
                needed: n,
                capacity: data.len().min(mask.len()),
            });
        }
        let base = index * n;
        for i in 0..n {
            let pixel = self.virtual_to_physical(base + i)?;
            self.read_pixels(pixel, &mut data[i..i + 1])?;
            self.read_flags(pixel, &mut mask[i..i + 1])?;
        }
        Ok(n)
    }

    /// Transfer one whole sub-cube, writing. Returns the number of pixels
    /// transferred.
    pub fn write_cube(
        &mut self,
        coords: &[usize],
        data: &[f32],
        mask: &[i32],
    ) -> Result<usize> {
        let index = self.subcube_from_coords(coords)?;
        let n = self.view()?.subcube_len();
        if data.len() < n || mask.len() < n {
            return Err(MiriadError::BufferTooSmall {
                needed: n,
                capacity: data.len().min(mask.len()),
            });
        }
        let base = index * n;
        for i in 0..n {
            let pixel = self.virtual_to_physical(base + i)?;
            self.write_pixels(pixel, &data[i..i + 1])?;
            self.write_flags(pixel, &mask[i..i + 1])?;
        }
        Ok(n)
    }

    /// Read one pixel by its virtual pixel number across the whole view.
    pub fn pixel_read(&mut self, pixnum: usize) -> Result<(f32, bool)> {
        let pixel = self.virtual_to_physical(pixnum)?;
        let mut data = [0f32];
        let mut flag = [0i32];
        self.read_pixels(pixel, &mut data)?;
        self.read_flags(pixel, &mut flag)?;
        Ok((data[0], flag[0] != 0))
    }

    fn profile_span(&self, profnum: usize) -> Result<(usize, usize)> {
        let view = self.view()?;
        if view.n_varying == 0 {
            return Err(MiriadError::validation(
                "profile access needs at least one varying axis",
            ));
        }
        let len = view.viraxlen[0];
        let total: usize = view.viraxlen.iter().product();
        let n_profiles = total / len;
        if profnum >= n_profiles {
            return Err(MiriadError::validation(format!(
                "profile {profnum} out of range ({n_profiles} profiles)"
            )));
        }
        Ok((profnum * len, len))
    }

    /// Read profile `profnum`: one run along the first virtual axis.
    /// Returns the number of pixels transferred.
    pub fn profile_read(
        &mut self,
        profnum: usize,
        data: &mut [f32],
        mask: &mut [i32],
    ) -> Result<usize> {
        let (start, len) = self.profile_span(profnum)?;
        if data.len() < len || mask.len() < len {
            return Err(MiriadError::BufferTooSmall {
                needed: len,
                capacity: data.len().min(mask.len()),
            });
        }
        for i in 0..len {
            let pixel = self.virtual_to_physical(start + i)?;
            self.read_pixels(pixel, &mut data[i..i + 1])?;
            self.read_flags(pixel, &mut mask[i..i + 1])?;
        }
        Ok(len)
    }

    pub fn profile_write(
        &mut self,
        profnum: usize,
        data: &[f32],
        mask: &[i32],
    ) -> Result<usize> {
        let (start, len) = self.profile_span(profnum)?;
        if data.len() < len || mask.len() < len {
            return Err(MiriadError::BufferTooSmall {
                needed: len,
                capacity: data.len().min(mask.len()),
            });
        }
        for i in 0..len {
            let pixel = self.virtual_to_physical(start + i)?;
            self.write_pixels(pixel, &data[i..i + 1])?;
            self.write_flags(pixel, &mask[i..i + 1])?;
        }
        Ok(len)
    }

    /// Make all pending writes durable.
    pub fn flush(&mut self) -> Result<()> {
        self.image.flush()?;
        if let Some(mask) = &mut self.mask {
            mask.flush()?;
        }
        self.dataset.flush()
    }

    /// Close the cube, flushing everything.
    pub fn close(mut self) -> Result<()> {
        self.image.flush()?;
        let ImageCube { image, mask, dataset, .. } = self;
        image.close()?;
        if let Some(mask) = mask {
            mask.close()?;
        }
        dataset.close()
    }
}

/*
Copyright 2025 Jakub Lewandowski

This file is part of Shybox.

Shybox is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Shybox is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Shybox. If not, see https://www.gnu.org/licenses/.
*/

//! Module containg methods for conducting
//! binary search (bisection) of elements closests
//! to searched values in coordinate axes.
//!
//! Axes can be sorted ascendingly (longitudes, times)
//! or descendingly (latitudes of north-up grids).

use crate::{errors::GridError, Float};

/// Core bisection function, simply an implementation
/// of binary search algorithm adapted to searching values
/// in-between the set items.
fn binary_search<T: PartialOrd>(array: &[T], x: &T) -> Result<usize, GridError> {
    let (first, last) = match (array.first(), array.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(GridError::EmptySelection("search in empty axis".to_string())),
    };

    if x < first && x < last || x > first && x > last {
        return Err(GridError::EmptySelection(
            "searched value is out of axis bounds".to_string(),
        ));
    }

    let mut lo = 0;
    let mut hi = array.len() - 1;

    // if the array is sorted descendingly we use a function with reversed signs
    if first < last {
        while lo < hi {
            let mid = (lo + hi) / 2;

            if array[mid] >= *x {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
    } else {
        while lo < hi {
            let mid = (lo + hi) / 2;

            if array[mid] <= *x {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
    }

    Ok(lo)
}

fn is_ascending<T: PartialOrd>(array: &[T]) -> bool {
    match (array.first(), array.last()) {
        (Some(first), Some(last)) => first < last,
        _ => true,
    }
}

/// Index of the closest item to the left of (not after) the searched value.
pub fn find_left_closest<T: PartialOrd>(array: &[T], x: &T) -> Result<usize, GridError> {
    let found_index = binary_search(array, x)?;

    let exact_or_before = if is_ascending(array) {
        array[found_index] <= *x
    } else {
        array[found_index] >= *x
    };

    if exact_or_before || found_index == 0 {
        Ok(found_index)
    } else {
        Ok(found_index - 1)
    }
}

/// Index of the closest item to the right of (not before) the searched value.
pub fn find_right_closest<T: PartialOrd>(array: &[T], x: &T) -> Result<usize, GridError> {
    let found_index = binary_search(array, x)?;

    let exact_or_after = if is_ascending(array) {
        array[found_index] >= *x
    } else {
        array[found_index] <= *x
    };

    if exact_or_after || found_index + 1 == array.len() {
        Ok(found_index)
    } else {
        Ok(found_index + 1)
    }
}

/// Index of the item nearest to the searched value.
pub fn find_nearest(array: &[Float], x: Float) -> Result<usize, GridError> {
    let left = find_left_closest(array, &x)?;
    let right = find_right_closest(array, &x)?;

    if (array[left] - x).abs() <= (array[right] - x).abs() {
        Ok(left)
    } else {
        Ok(right)
    }
}

#[cfg(test)]
mod tests {
    use super::{find_left_closest, find_nearest, find_right_closest};

    #[test]
    fn ascending_axis() {
        let axis = [0.0, 1.0, 2.0, 3.0];

        assert_eq!(find_left_closest(&axis, &1.4).unwrap(), 1);
        assert_eq!(find_right_closest(&axis, &1.4).unwrap(), 2);
        assert_eq!(find_left_closest(&axis, &2.0).unwrap(), 2);
        assert_eq!(find_nearest(&axis, 1.6).unwrap(), 2);
        assert!(find_nearest(&axis, 3.5).is_err());
    }

    #[test]
    fn descending_axis() {
        let axis = [44.0, 43.5, 43.0];

        assert_eq!(find_left_closest(&axis, &43.7).unwrap(), 0);
        assert_eq!(find_right_closest(&axis, &43.7).unwrap(), 1);
        assert_eq!(find_nearest(&axis, 43.1).unwrap(), 2);
    }

    #[test]
    fn empty_axis() {
        let axis: [crate::Float; 0] = [];
        assert!(find_nearest(&axis, 1.0).is_err());
    }
}

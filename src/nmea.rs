//! NMEA position sentences, attached to requests
//! when the caster needs to know where we are.
use crate::prelude::Epoch;

/// XOR checksum of all characters between '$' and '*'
pub(crate) fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Formats an angle as NMEA (d)ddmm.mmmmm plus hemisphere
fn nmea_angle(angle_ddeg: f64, deg_width: usize, positive: char, negative: char) -> String {
    let hemisphere = if angle_ddeg < 0.0 { negative } else { positive };
    let abs = angle_ddeg.abs();
    let mut deg = abs.trunc();
    let mut min = (abs - deg) * 60.0;
    // avoid "60.00000" after rounding
    if (min * 1.0E5).round() >= 60.0E5 {
        deg += 1.0;
        min = 0.0;
    }
    format!(
        "{:0width$}{:08.5},{}",
        deg as u32,
        min,
        hemisphere,
        width = deg_width
    )
}

/// Builds a $GPGGA sentence, describing a fixed position
/// at (lat, lon) in decimal degrees, sampled at [Epoch] `t`.
pub fn gga_sentence(latitude: f64, longitude: f64, t: Epoch) -> String {
    let (_, _, _, hh, mm, ss, _) = t.to_gregorian_utc();
    let body = format!(
        "GPGGA,{:02}{:02}{:02}.00,{},{},1,12,1.0,0.0,M,0.0,M,,",
        hh,
        mm,
        ss,
        nmea_angle(latitude, 2, 'N', 'S'),
        nmea_angle(longitude, 3, 'E', 'W'),
    );
    format!("${}*{:02X}", body, checksum(&body))
}

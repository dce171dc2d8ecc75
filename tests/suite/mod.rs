mod properties;
mod scenarios;
mod tool_surface;

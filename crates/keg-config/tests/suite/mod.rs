mod load;
mod logging;
